// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Instruction and data cache controller.
//!
//! Both caches share one register layout at separate base addresses.
//! Each controller carries a per-region policy matrix (boot flash, ROM,
//! and the three SPI memory controllers), whole-cache way invalidation,
//! and line granular range invalidation. Maintenance requests widen to
//! whole 16 byte lines, and ranged maintenance is ignored while the
//! cache is disabled.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

use crate::StaticRef;

register_structs! {
    /// Cache controller, one block per cache instance
    CacheRegisters {
        /// Cache Control Register
        (0x000 => ccr: ReadWrite<u32, CCR::Register>),
        /// Cache Attribute Control Register, the ROM policy pair
        (0x004 => cacr: ReadWrite<u32>),
        /// Cache Slot Attribute Control Register, the slot policy pairs
        (0x008 => csacr: ReadWrite<u32>),
        /// Cache Physical External Address Register
        (0x00C => cpea: ReadWrite<u32>),
        /// Cache Physical External Size Register
        (0x010 => cpes: ReadWrite<u32, CPES::Register>),
        (0x014 => @END),
    }
}

register_bitfields![u32,
    CCR [
        /// Cache enable
        ENCACHE OFFSET(0) NUMBITS(1) [],
        /// Invalidate way 0 on the next go
        INVW0 OFFSET(24) NUMBITS(1) [],
        /// Invalidate way 1 on the next go
        INVW1 OFFSET(26) NUMBITS(1) [],
        /// Start the way command; self-clears on completion
        GO OFFSET(31) NUMBITS(1) []
    ],
    CPES [
        /// Start the line invalidate; self-clears on completion
        START_INVAL OFFSET(0) NUMBITS(1) [],
        /// Line aligned byte length of the request
        LEN OFFSET(4) NUMBITS(28) []
    ],
];

const ICACHE_BASE: StaticRef<CacheRegisters> =
    unsafe { StaticRef::new(0xE008_2000 as *const CacheRegisters) };
const DCACHE_BASE: StaticRef<CacheRegisters> =
    unsafe { StaticRef::new(0xE008_2800 as *const CacheRegisters) };

pub const CACHE_LINE_SIZE: u32 = 16;

/// Cacheable regions with an individually selectable policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheRegion {
    /// Boot flash slots
    Boot,
    /// Internal ROM
    Rom,
    /// SPI memory controller 1 slots
    Spim1,
    /// SPI memory controller 2 slots
    Spim2,
    /// SPI memory controller 3 slots
    Spim3,
}

/// Caching policy of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CachePolicy {
    /// Region bypasses the cache
    Off,
    /// Reads allocate, writes go straight to memory
    WriteThrough,
    /// Reads and writes allocate, lines are written back on eviction
    WriteBack,
}

/// Per-region policies applied by `configure_regions`.
#[derive(Clone, Copy, Debug)]
pub struct RegionPolicies {
    pub boot: CachePolicy,
    pub rom: CachePolicy,
    pub spim1: CachePolicy,
    pub spim2: CachePolicy,
    pub spim3: CachePolicy,
}

/// Which policy register a region's mask bits live in.
enum PolicyRegister {
    Cacr,
    Csacr,
}

/// Mask pair of a region. Even bits of a slot pair mark it cacheable,
/// odd bits pick write-back over write-through.
struct RegionControl {
    select: PolicyRegister,
    cacheable_mask: u32,
    write_back_mask: u32,
}

const fn region_control(region: CacheRegion) -> RegionControl {
    match region {
        CacheRegion::Boot => RegionControl {
            select: PolicyRegister::Csacr,
            cacheable_mask: 0x0000_0055,
            write_back_mask: 0x0000_00AA,
        },
        CacheRegion::Rom => RegionControl {
            select: PolicyRegister::Cacr,
            cacheable_mask: 0x0000_0001,
            write_back_mask: 0x0000_0002,
        },
        CacheRegion::Spim1 => RegionControl {
            select: PolicyRegister::Csacr,
            cacheable_mask: 0x0000_5500,
            write_back_mask: 0x0000_AA00,
        },
        CacheRegion::Spim2 => RegionControl {
            select: PolicyRegister::Csacr,
            cacheable_mask: 0x0055_0000,
            write_back_mask: 0x00AA_0000,
        },
        CacheRegion::Spim3 => RegionControl {
            select: PolicyRegister::Csacr,
            cacheable_mask: 0x5500_0000,
            write_back_mask: 0xAA00_0000,
        },
    }
}

/// Fold a region policy into a policy register value.
fn apply_policy(value: u32, control: &RegionControl, policy: CachePolicy) -> u32 {
    match policy {
        CachePolicy::Off => value & !(control.cacheable_mask | control.write_back_mask),
        CachePolicy::WriteThrough => (value | control.cacheable_mask) & !control.write_back_mask,
        CachePolicy::WriteBack => value | control.cacheable_mask | control.write_back_mask,
    }
}

/// Align a maintenance request to whole cache lines. Returns the line
/// aligned base address together with the widened byte length covering
/// every line the request touches.
fn align_to_lines(address: u32, length: u32) -> (u32, u32) {
    let base = address & !(CACHE_LINE_SIZE - 1);
    let span = (address - base) + length;
    let widened = (span + (CACHE_LINE_SIZE - 1)) & !(CACHE_LINE_SIZE - 1);
    (base, widened)
}

/// One cache instance. The chip carries an instruction cache and a data
/// cache with identical controllers.
pub struct Cache {
    registers: StaticRef<CacheRegisters>,
}

impl Cache {
    /// Instruction cache instance.
    pub const fn new_icache() -> Cache {
        Cache {
            registers: ICACHE_BASE,
        }
    }

    /// Data cache instance.
    pub const fn new_dcache() -> Cache {
        Cache {
            registers: DCACHE_BASE,
        }
    }

    pub fn enable(&self) {
        self.registers.ccr.modify(CCR::ENCACHE::SET);
    }

    pub fn disable(&self) {
        self.registers.ccr.modify(CCR::ENCACHE::CLEAR);
    }

    pub fn is_enabled(&self) -> bool {
        self.registers.ccr.is_set(CCR::ENCACHE)
    }

    /// Select the caching policy of one region. One read and one write
    /// of the region's policy register.
    pub fn set_region_policy(&self, region: CacheRegion, policy: CachePolicy) {
        let control = region_control(region);
        match control.select {
            PolicyRegister::Cacr => {
                let value = apply_policy(self.registers.cacr.get(), &control, policy);
                self.registers.cacr.set(value);
            }
            PolicyRegister::Csacr => {
                let value = apply_policy(self.registers.csacr.get(), &control, policy);
                self.registers.csacr.set(value);
            }
        }
    }

    /// Policy currently programmed for a region. A region only counts
    /// as cacheable or write-back when every slot in it agrees.
    pub fn region_policy(&self, region: CacheRegion) -> CachePolicy {
        let control = region_control(region);
        let value = match control.select {
            PolicyRegister::Cacr => self.registers.cacr.get(),
            PolicyRegister::Csacr => self.registers.csacr.get(),
        };
        if (value & control.cacheable_mask) != control.cacheable_mask {
            CachePolicy::Off
        } else if (value & control.write_back_mask) == control.write_back_mask {
            CachePolicy::WriteBack
        } else {
            CachePolicy::WriteThrough
        }
    }

    /// Apply a full policy set, region by region.
    pub fn configure_regions(&self, policies: RegionPolicies) {
        self.set_region_policy(CacheRegion::Boot, policies.boot);
        self.set_region_policy(CacheRegion::Rom, policies.rom);
        self.set_region_policy(CacheRegion::Spim1, policies.spim1);
        self.set_region_policy(CacheRegion::Spim2, policies.spim2);
        self.set_region_policy(CacheRegion::Spim3, policies.spim3);
    }

    /// Invalidate every line in both ways. Spins until the command
    /// completes; the go bit self-clears.
    pub fn invalidate_all(&self) {
        self.registers
            .ccr
            .modify(CCR::INVW0::SET + CCR::INVW1::SET + CCR::GO::SET);
        while self.registers.ccr.is_set(CCR::GO) {}
    }

    /// Invalidate the lines covering `length` bytes at `address`. The
    /// request widens to whole lines. Does nothing while the cache is
    /// disabled.
    pub fn invalidate_range(&self, address: u32, length: u32) {
        if !self.is_enabled() {
            return;
        }
        let (base, widened) = align_to_lines(address, length);
        self.registers.cpea.set(base);
        self.registers
            .cpes
            .write(CPES::LEN.val(widened >> 4) + CPES::START_INVAL::SET);
        while self.registers.cpes.is_set(CPES::START_INVAL) {}
    }

    /// Bring the cache to a clean enabled state: program the region
    /// policies with the cache disabled, drop every stale line, then
    /// enable.
    pub fn initialize(&self, policies: RegionPolicies) {
        self.disable();
        self.configure_regions(policies);
        self.invalidate_all();
        self.enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;

    fn fixture() -> Cache {
        let mem = Box::leak(Box::new([0u32; 0x14 / 4])).as_mut_ptr();
        Cache {
            registers: unsafe { StaticRef::new(mem as *const CacheRegisters) },
        }
    }

    #[test]
    fn enable_toggles_only_the_enable_bit() {
        let cache = fixture();
        assert!(!cache.is_enabled());
        cache.enable();
        assert!(cache.is_enabled());
        assert_eq!(cache.registers.ccr.get(), 1);
        cache.disable();
        assert!(!cache.is_enabled());
        assert_eq!(cache.registers.ccr.get(), 0);
    }

    #[test]
    fn region_policies_drive_the_expected_mask_bits() {
        let cache = fixture();
        cache.set_region_policy(CacheRegion::Spim2, CachePolicy::WriteBack);
        assert_eq!(cache.registers.csacr.get(), 0x00FF_0000);
        cache.set_region_policy(CacheRegion::Spim2, CachePolicy::WriteThrough);
        assert_eq!(cache.registers.csacr.get(), 0x0055_0000);
        cache.set_region_policy(CacheRegion::Boot, CachePolicy::WriteBack);
        assert_eq!(cache.registers.csacr.get(), 0x0055_00FF);
        cache.set_region_policy(CacheRegion::Spim2, CachePolicy::Off);
        assert_eq!(cache.registers.csacr.get(), 0x0000_00FF);

        cache.set_region_policy(CacheRegion::Rom, CachePolicy::WriteThrough);
        assert_eq!(cache.registers.cacr.get(), 0x0000_0001);
        cache.set_region_policy(CacheRegion::Rom, CachePolicy::WriteBack);
        assert_eq!(cache.registers.cacr.get(), 0x0000_0003);
    }

    #[test]
    fn region_policy_readback_decodes_the_pair() {
        let cache = fixture();
        assert_eq!(cache.region_policy(CacheRegion::Spim1), CachePolicy::Off);
        cache.set_region_policy(CacheRegion::Spim1, CachePolicy::WriteThrough);
        assert_eq!(
            cache.region_policy(CacheRegion::Spim1),
            CachePolicy::WriteThrough
        );
        cache.set_region_policy(CacheRegion::Spim1, CachePolicy::WriteBack);
        assert_eq!(
            cache.region_policy(CacheRegion::Spim1),
            CachePolicy::WriteBack
        );
        // Neighboring slots keep their own policy.
        assert_eq!(cache.region_policy(CacheRegion::Spim2), CachePolicy::Off);
    }

    #[test]
    fn configure_regions_applies_every_region() {
        let cache = fixture();
        cache.configure_regions(RegionPolicies {
            boot: CachePolicy::WriteBack,
            rom: CachePolicy::WriteThrough,
            spim1: CachePolicy::Off,
            spim2: CachePolicy::WriteThrough,
            spim3: CachePolicy::WriteBack,
        });
        assert_eq!(cache.registers.cacr.get(), 0x0000_0001);
        assert_eq!(cache.registers.csacr.get(), 0xFF55_00FF);
    }

    #[test]
    fn line_alignment_widens_to_touched_lines() {
        assert_eq!(align_to_lines(0x1007, 20), (0x1000, 32));
        assert_eq!(align_to_lines(0x1000, 16), (0x1000, 16));
        assert_eq!(align_to_lines(0x100F, 1), (0x1000, 16));
        assert_eq!(align_to_lines(0x1010, 0), (0x1010, 0));
    }

    #[test]
    fn range_invalidate_is_a_no_op_while_disabled() {
        let cache = fixture();
        cache.invalidate_range(0x1007, 20);
        assert_eq!(cache.registers.cpea.get(), 0);
        assert_eq!(cache.registers.cpes.get(), 0);
    }
}
