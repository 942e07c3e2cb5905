// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Peripheral implementations for the FT9001 MCU.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod cache;
pub mod cpm;
pub mod tc;
pub mod wdt;

mod errorcode;
mod static_ref;

pub use self::errorcode::ErrorCode;
pub use self::static_ref::StaticRef;
