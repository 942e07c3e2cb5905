// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Standard error enum for invoking peripheral operations.

/// Standard errors for FT9001 peripheral drivers.
///
/// Success cases are expressed as `Ok(())`, so this enum only carries
/// failures. Discriminant 0 is reserved for encoding success wherever the
/// numeric representation is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// Generic failure condition
    FAIL = 1,
    /// Underlying hardware is busy; retry
    BUSY = 2,
    /// A bounded wait for a hardware flag elapsed
    TIMEOUT = 3,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}
