// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Clock and power management (CPM) peripheral.
//!
//! Owns system clock source selection between the internal 8 MHz
//! oscillator and the high speed oscillator, the factory trim load for
//! the high speed oscillator from the OTP fuse block, and the peripheral
//! bus dividers. Trim registers sit behind the stepped override key in
//! `VCCCTMR`, and a trim load always runs with the system clock parked
//! on the 8 MHz oscillator.

use core::cell::Cell;

use tock_registers::fields::FieldValue;
use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use crate::{ErrorCode, StaticRef};

register_structs! {
    /// Clock and Power Management
    CpmRegisters {
        /// Sleep Configuration Register
        (0x000 => slpcfgr: ReadWrite<u32>),
        /// Sleep Control Register
        (0x004 => slpcr: ReadWrite<u32>),
        /// System Clock Divider Register
        (0x008 => scdivr: ReadWrite<u32, SCDIVR::Register>),
        /// Peripheral Clock Divider Register 1
        (0x00C => pcdivr1: ReadWrite<u32, PCDIVR1::Register>),
        /// Peripheral Clock Divider Register 2
        (0x010 => pcdivr2: ReadWrite<u32>),
        (0x014 => _reserved0),
        /// Clock Divider Update Register
        (0x018 => cdivupdr: ReadWrite<u32, CDIVUPDR::Register>),
        /// Clock Divider Enable Register
        (0x01C => cdivenr: ReadWrite<u32, CDIVENR::Register>),
        /// Oscillator Control and Status Register
        (0x020 => ocsr: ReadWrite<u32, OCSR::Register>),
        /// Clock Switch Configuration Register
        (0x024 => cswcfgr: ReadWrite<u32, CSWCFGR::Register>),
        /// Core Tick Register
        (0x028 => ctickr: ReadWrite<u32>),
        /// Chip Configuration Register
        (0x02C => chipcfgr: ReadWrite<u32>),
        /// Power Control Register
        (0x030 => pwrcr: ReadWrite<u32>),
        /// Sleep Counter Register
        (0x034 => slpcntr: ReadWrite<u32>),
        /// Wakeup Counter Register
        (0x038 => wkpcntr: ReadWrite<u32>),
        /// Multi-clock Gating Control Register
        (0x03C => multicgtcr: ReadWrite<u32>),
        /// System Clock Gating Control Register
        (0x040 => syscgtcr: ReadWrite<u32>),
        /// AHB3 Clock Gating Control Register
        (0x044 => ahb3cgtcr: ReadWrite<u32>),
        /// Arithmetic Clock Gating Control Register
        (0x048 => arithcgtcr: ReadWrite<u32>),
        /// IPS Clock Gating Control Register
        (0x04C => ipscgtcr: ReadWrite<u32>),
        /// VCC Global Trim Register
        (0x050 => vccgtrimr: ReadWrite<u32>),
        /// VCC LDO Trim Register
        (0x054 => vccltrimr: ReadWrite<u32>),
        /// VCC Reference Trim Register
        (0x058 => vccvtrimr: ReadWrite<u32>),
        /// VCC Core Test Mode Register, gates the trim override window
        (0x05C => vccctmr: ReadWrite<u32, VCCCTMR::Register>),
        /// 8 MHz Oscillator Trim Register
        (0x060 => o8mtrimr: ReadWrite<u32>),
        (0x064 => _reserved1),
        /// High Speed Oscillator Trim Register
        (0x068 => o400mtrimr: ReadWrite<u32, O400MTRIMR::Register>),
        /// Card LDO Trim Register
        (0x06C => cardtrimr: ReadWrite<u32>),
        /// Low Speed Oscillator Stable Time Register
        (0x070 => osclstimer: ReadWrite<u32>),
        /// High Speed Oscillator Stable Time Register
        (0x074 => oschstimer: ReadWrite<u32>),
        /// External Oscillator Stable Time Register
        (0x078 => oscestimer: ReadWrite<u32>),
        /// Power Status Register
        (0x07C => pwrsr: ReadWrite<u32>),
        /// EPORT Sleep Configuration Register
        (0x080 => eportslpcfgr: ReadWrite<u32>),
        /// EPORT Clock Gating Register
        (0x084 => eportcgtr: ReadWrite<u32>),
        /// EPORT Reset Control Register
        (0x088 => eportrstcr: ReadWrite<u32>),
        /// RTC Trim Register
        (0x08C => rtctrimr: ReadWrite<u32>),
        /// Pad Wakeup Interrupt Control Register
        (0x090 => padwkintcr: ReadWrite<u32>),
        /// Wakeup Filter Counter Register
        (0x094 => wkpfiltcntr: ReadWrite<u32>),
        /// Card Power-on Control Register
        (0x098 => cardpocr: ReadWrite<u32>),
        /// RTC Stable Time Register
        (0x09C => rtcstimer: ReadWrite<u32>),
        /// Main Power Domain Sleep Control Register
        (0x0A0 => mpdslpcr: ReadWrite<u32>),
        (0x0A4 => _reserved2),
        /// Multi-module Reset Control Register
        (0x0AC => multirstcr: ReadWrite<u32>),
        /// System Reset Control Register
        (0x0B0 => sysrstcr: ReadWrite<u32>),
        /// AHB3 Reset Control Register
        (0x0B4 => ahb3rstcr: ReadWrite<u32>),
        /// Arithmetic Reset Control Register
        (0x0B8 => arithrsttcr: ReadWrite<u32>),
        /// IPS Reset Control Register
        (0x0BC => iprstcr: ReadWrite<u32>),
        /// Sleep Configuration Register 2
        (0x0C0 => slpcfgr2: ReadWrite<u32>),
        (0x0C4 => _reserved3),
        /// Power-down Counter Register
        (0x0D0 => pdncntr: ReadWrite<u32>),
        /// Power-on Counter Register
        (0x0D4 => poncntr: ReadWrite<u32>),
        /// Peripheral Clock Divider Register 4
        (0x0D8 => pcdivr4: ReadWrite<u32>),
        (0x0DC => _reserved4),
        /// NFC PLL Configuration Register
        (0x0E0 => pllnfccfgr: ReadWrite<u32>),
        /// NFC PLL Stable Time Register
        (0x0E4 => pllnfcstimer: ReadWrite<u32>),
        (0x0E8 => @END),
    },

    /// OTP fuse window holding the factory oscillator trim
    OtpRegisters {
        (0x000 => _reserved0),
        /// 400 MHz trim word, tagged in the upper byte when programmed
        (0x0E4 => trim400: ReadOnly<u32, TRIM400::Register>),
        (0x0E8 => _reserved1),
        /// 320 MHz trim word, redundancy partition 0
        (0x700 => trim320_value_0: ReadOnly<u32>),
        /// Enable key guarding partition 0's trim word
        (0x704 => trim320_enable_0: ReadOnly<u32>),
        (0x708 => _reserved2),
        /// 320 MHz trim word, redundancy partition 1
        (0x760 => trim320_value_1: ReadOnly<u32>),
        /// Enable key guarding partition 1's trim word
        (0x764 => trim320_enable_1: ReadOnly<u32>),
        (0x768 => _reserved3),
        /// 320 MHz trim word, redundancy partition 2
        (0x7C0 => trim320_value_2: ReadOnly<u32>),
        /// Enable key guarding partition 2's trim word
        (0x7C4 => trim320_enable_2: ReadOnly<u32>),
        (0x7C8 => _reserved4),
        /// Per-partition signature words
        (0x7F0 => partition_valid: [ReadOnly<u32>; 3]),
        (0x7FC => @END),
    }
}

register_bitfields![u32,
    SCDIVR [
        /// System clock divider, divides by the field value plus one
        SYS_DIV OFFSET(0) NUMBITS(8) [],
        /// Trace clock divider
        TRACE_DIV OFFSET(8) NUMBITS(8) [],
        /// Clock-out divider
        CLKOUT_DIV OFFSET(16) NUMBITS(8) []
    ],
    PCDIVR1 [
        /// IPS bus divider, divides by the field value plus one
        IPS_DIV OFFSET(0) NUMBITS(4) [],
        /// AHB3 bus divider
        AHB3_DIV OFFSET(8) NUMBITS(4) [],
        /// Arithmetic block divider
        ARITH_DIV OFFSET(12) NUMBITS(4) []
    ],
    CDIVUPDR [
        /// Latch the peripheral divider fields into the dividers
        PERDIV_UPD OFFSET(0) NUMBITS(1) [],
        /// Latch the system divider field into the divider
        SYSDIV_UPD OFFSET(1) NUMBITS(1) []
    ],
    CDIVENR [
        IPS_DIVEN OFFSET(0) NUMBITS(1) [],
        AHB3_DIVEN OFFSET(2) NUMBITS(1) [],
        ARITH_DIVEN OFFSET(3) NUMBITS(1) [],
        MCC_DIVEN OFFSET(8) NUMBITS(1) [],
        ADC_DIVEN OFFSET(10) NUMBITS(1) [],
        MESH_DIVEN OFFSET(12) NUMBITS(1) [],
        TC_DIVEN OFFSET(13) NUMBITS(1) [],
        TRACE_DIVEN OFFSET(14) NUMBITS(1) [],
        CLKOUT_DIVEN OFFSET(15) NUMBITS(1) [],
        I2S_M_DIVEN OFFSET(22) NUMBITS(1) [],
        I2S_S_DIVEN OFFSET(23) NUMBITS(1) []
    ],
    OCSR [
        OSC8M_EN OFFSET(0) NUMBITS(1) [],
        PMU128K_EN OFFSET(1) NUMBITS(1) [],
        USBPHY240M_EN OFFSET(2) NUMBITS(1) [],
        OSC400M_EN OFFSET(3) NUMBITS(1) [],
        OSCEXT_EN OFFSET(4) NUMBITS(1) [],
        RTC32K_EN OFFSET(5) NUMBITS(1) [],
        PMU2K_EN OFFSET(6) NUMBITS(1) [],
        PLLNFC_EN OFFSET(7) NUMBITS(1) [],
        OSC8M_STABLE OFFSET(8) NUMBITS(1) [],
        PMU128K_STABLE OFFSET(9) NUMBITS(1) [],
        USBPHY240M_STABLE OFFSET(10) NUMBITS(1) [],
        OSC400M_STABLE OFFSET(11) NUMBITS(1) [],
        OSCEXT_STABLE OFFSET(12) NUMBITS(1) [],
        RTC32K_STABLE OFFSET(13) NUMBITS(1) [],
        PMU2K_VALID OFFSET(14) NUMBITS(1) [],
        PLLNFC_STABLE OFFSET(15) NUMBITS(1) []
    ],
    CSWCFGR [
        /// System clock source select
        SYS_SEL OFFSET(0) NUMBITS(1) [
            Osc8M = 0,
            Osc400M = 1
        ],
        /// Low speed clock source select
        OSCL_SEL OFFSET(6) NUMBITS(1) [],
        /// One-hot acknowledge that the 8 MHz oscillator feeds the system
        SYS_SEL_ST_OSC8M OFFSET(8) NUMBITS(1) [],
        /// One-hot acknowledge that the high speed oscillator feeds the system
        SYS_SEL_ST_OSC400M OFFSET(9) NUMBITS(1) [],
        /// One-hot acknowledge of the low speed source selection
        OSCL_SEL_ST OFFSET(20) NUMBITS(2) [],
        /// Clock-out source select
        CLKOUT_SEL OFFSET(24) NUMBITS(2) [
            System = 0,
            Arith = 1,
            PllNfc = 2,
            OscLow = 3
        ],
        /// One-hot acknowledge of the clock-out source selection
        CLKOUT_SEL_ST OFFSET(28) NUMBITS(4) []
    ],
    VCCCTMR [
        EN_LP OFFSET(0) NUMBITS(1) [],
        OFF_MODE2 OFFSET(2) NUMBITS(1) [],
        SOFT_POR OFFSET(3) NUMBITS(1) [],
        CPU_CORE_TEST_EN OFFSET(7) NUMBITS(1) [],
        OFF_MODE_WK OFFSET(8) NUMBITS(1) [],
        OVERWR_OCSR_TRIM OFFSET(9) NUMBITS(1) [],
        OVERWR_PCDIV_TRIM OFFSET(10) NUMBITS(1) [],
        OVERWR_SCDIV_TRIM OFFSET(11) NUMBITS(1) [],
        OVERWR_ARITHCGT_TRIM OFFSET(13) NUMBITS(1) [],
        OVERWR_OSCE_STABLE_TRIM OFFSET(16) NUMBITS(1) [],
        OVERWR_OSCH_STABLE_TRIM OFFSET(17) NUMBITS(1) [],
        OVERWR_OSCL_STABLE_TRIM OFFSET(18) NUMBITS(1) [],
        OVERWR_OSC400M_TRIM OFFSET(19) NUMBITS(1) [],
        OVERWR_OSC8M_TRIM OFFSET(20) NUMBITS(1) [],
        OVERWR_VREF_TRIM OFFSET(21) NUMBITS(1) [],
        OVERWR_LVD_TRIM OFFSET(22) NUMBITS(1) [],
        OVERWR_VCC_TRIM OFFSET(23) NUMBITS(1) [],
        OVERWR_CARDLDO_TRIM OFFSET(24) NUMBITS(1) [],
        OVERWR_RTC_STABLE_TRIM OFFSET(26) NUMBITS(1) [],
        OVERWR_RTC_TRIM OFFSET(28) NUMBITS(1) [],
        OVERWR_CSWCFGR_TRIM OFFSET(29) NUMBITS(1) [],
        /// Stepped key opening the trim override window
        CORE_TEST_KEY OFFSET(30) NUMBITS(2) [
            Locked = 0b00,
            Step1 = 0b01,
            Step2 = 0b10,
            Open = 0b11
        ]
    ],
    O400MTRIMR [
        /// High speed oscillator trim payload
        OSC400M_TRIM OFFSET(0) NUMBITS(17) []
    ],
    TRIM400 [
        /// Raw trim payload forwarded to the trim register
        TRIM OFFSET(0) NUMBITS(17) [],
        /// Tag byte, reads as 0x92 once the word is factory programmed
        TAG OFFSET(24) NUMBITS(8) []
    ],
];

const CPM_BASE: StaticRef<CpmRegisters> =
    unsafe { StaticRef::new(0x4000_4000 as *const CpmRegisters) };
const OTP_BASE: StaticRef<OtpRegisters> =
    unsafe { StaticRef::new(0x0820_0000 as *const OtpRegisters) };

/// Signature marking an OTP redundancy partition as programmed.
const OTP_PARTITION_SIGNATURE: u32 = 0x55AA_55AA;
/// Key stored next to a 320 MHz trim word when that partition's trim is usable.
const OTP_TRIM320_KEY: u32 = 0x7765_8320;
/// Tag byte carried in the upper bits of a programmed 400 MHz trim word.
const OTP_TRIM400_TAG: u32 = 0x92;

pub const OSC8M_HZ: u32 = 8_000_000;

/// Nominal high speed oscillator frequency out of reset, before any trim.
const HSOSC_DEFAULT_HZ: u32 = 320_000_000;

/// Iterations of the status poll loop spent per millisecond of budget,
/// calibrated for the boot clock.
const POLL_ITERATIONS_PER_MS: u32 = 20_000;

/// Poll budget for the fallback switch onto the 8 MHz oscillator that
/// precedes a trim write.
const TRIM_SWITCH_TIMEOUT_MS: u32 = 100;

/// Poll budget for the switch onto the high speed oscillator at boot.
const BOOT_SWITCH_TIMEOUT_MS: u32 = 5;

/// Selectable system clock sources.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemClockSource {
    /// Internal 8 MHz oscillator, the source the chip boots on and the
    /// safe harbor during trim loads.
    Osc8M,
    /// High speed internal oscillator, factory trimmed to 320 or 400 MHz.
    Osc400M,
}

/// Target frequencies a high speed oscillator trim load can aim for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OscillatorFrequency {
    Frequency320MHz,
    Frequency400MHz,
}

/// Spin until `ready` reports true. A zero `timeout_ms` spins without
/// bound; otherwise the wait gives up once the iteration budget for
/// `timeout_ms` is spent.
fn wait_for(timeout_ms: u32, mut ready: impl FnMut() -> bool) -> Result<(), ErrorCode> {
    if timeout_ms == 0 {
        while !ready() {}
        return Ok(());
    }
    let mut budget = timeout_ms.saturating_mul(POLL_ITERATIONS_PER_MS);
    while !ready() {
        if budget == 0 {
            return Err(ErrorCode::TIMEOUT);
        }
        budget -= 1;
    }
    Ok(())
}

/// Open trim override window.
///
/// Construction performs the four stepped key writes that unlock the
/// trim registers, with the requested override select bits asserted on
/// the final step. Dropping the window writes the locked key pattern
/// back, so the window closes on every path out of the caller.
struct OverrideWindow<'a> {
    registers: &'a CpmRegisters,
}

impl<'a> OverrideWindow<'a> {
    fn open(
        registers: &'a CpmRegisters,
        override_select: FieldValue<u32, VCCCTMR::Register>,
    ) -> OverrideWindow<'a> {
        // All four stepped writes share the non-key bits of one base
        // read, so only the key field and the override select change.
        let base = VCCCTMR::CORE_TEST_KEY::Locked.modify(registers.vccctmr.get());
        registers.vccctmr.set(VCCCTMR::CORE_TEST_KEY::Step1.modify(base));
        registers.vccctmr.set(VCCCTMR::CORE_TEST_KEY::Step2.modify(base));
        registers.vccctmr.set(VCCCTMR::CORE_TEST_KEY::Open.modify(base));
        registers
            .vccctmr
            .set((VCCCTMR::CORE_TEST_KEY::Open + override_select).modify(base));
        OverrideWindow { registers }
    }
}

impl Drop for OverrideWindow<'_> {
    fn drop(&mut self) {
        self.registers.vccctmr.modify(VCCCTMR::CORE_TEST_KEY::Locked);
    }
}

/// Clock and power management driver. One instance serves the chip.
pub struct Cpm {
    registers: StaticRef<CpmRegisters>,
    otp: StaticRef<OtpRegisters>,
    /// Frequency the high speed oscillator runs at after the most recent
    /// trim load, used for the software view of the system frequency.
    hsosc_nominal_hz: Cell<u32>,
}

impl Cpm {
    pub const fn new() -> Cpm {
        Cpm {
            registers: CPM_BASE,
            otp: OTP_BASE,
            hsosc_nominal_hz: Cell::new(HSOSC_DEFAULT_HZ),
        }
    }

    /// Switch the system clock to `source`.
    ///
    /// Enables the source oscillator, waits for it to report stable,
    /// then selects it and waits for the switch acknowledge. Both waits
    /// share the `timeout_ms` budget; zero waits without bound.
    pub fn set_system_clock(
        &self,
        source: SystemClockSource,
        timeout_ms: u32,
    ) -> Result<(), ErrorCode> {
        let (enable, stable, select, selected) = match source {
            SystemClockSource::Osc8M => (
                OCSR::OSC8M_EN::SET,
                OCSR::OSC8M_STABLE,
                CSWCFGR::SYS_SEL::Osc8M,
                CSWCFGR::SYS_SEL_ST_OSC8M,
            ),
            SystemClockSource::Osc400M => (
                OCSR::OSC400M_EN::SET,
                OCSR::OSC400M_STABLE,
                CSWCFGR::SYS_SEL::Osc400M,
                CSWCFGR::SYS_SEL_ST_OSC400M,
            ),
        };

        self.registers.ocsr.modify(enable);
        wait_for(timeout_ms, || self.registers.ocsr.is_set(stable))?;
        self.registers.cswcfgr.modify(select);
        wait_for(timeout_ms, || self.registers.cswcfgr.is_set(selected))
    }

    /// Load the factory trim for the high speed oscillator from OTP.
    ///
    /// The system clock is parked on the 8 MHz oscillator first so the
    /// trim never lands on the oscillator the core is running from. A
    /// trim that fails OTP validation leaves the trim register, the
    /// nominal frequency, and the clock selection untouched, so the
    /// system stays on the 8 MHz source.
    ///
    /// Loading a trim does not switch the system clock onto the high
    /// speed oscillator; that is a separate `set_system_clock` call.
    pub fn set_high_speed_osc_trim(
        &self,
        frequency: OscillatorFrequency,
    ) -> Result<(), ErrorCode> {
        self.set_system_clock(SystemClockSource::Osc8M, TRIM_SWITCH_TIMEOUT_MS)?;

        match frequency {
            OscillatorFrequency::Frequency320MHz => {
                let (enable, value) = self.trim320_words(self.pick_otp_partition());
                if enable != OTP_TRIM320_KEY {
                    return Err(ErrorCode::FAIL);
                }
                {
                    let _window = OverrideWindow::open(
                        &self.registers,
                        VCCCTMR::OVERWR_OSC400M_TRIM::SET,
                    );
                    self.registers.o400mtrimr.set(value);
                }
                self.hsosc_nominal_hz.set(320_000_000);
                Ok(())
            }
            OscillatorFrequency::Frequency400MHz => {
                let fuse = self.otp.trim400.extract();
                if fuse.read(TRIM400::TAG) != OTP_TRIM400_TAG {
                    return Err(ErrorCode::FAIL);
                }
                {
                    let _window = OverrideWindow::open(
                        &self.registers,
                        VCCCTMR::OVERWR_OSC400M_TRIM::SET,
                    );
                    self.registers.o400mtrimr.set(fuse.get());
                }
                self.hsosc_nominal_hz.set(400_000_000);
                Ok(())
            }
        }
    }

    /// Program the IPS bus divider. `divider` is the raw field value, so
    /// the bus runs at the system clock divided by `divider + 1`.
    pub fn set_ips_clock_divider(&self, divider: u32) -> Result<(), ErrorCode> {
        if divider > 0xF {
            return Err(ErrorCode::FAIL);
        }
        self.registers.cdivenr.modify(CDIVENR::IPS_DIVEN::SET);
        self.registers.pcdivr1.modify(PCDIVR1::IPS_DIV.val(divider));
        self.registers.cdivupdr.modify(CDIVUPDR::PERDIV_UPD::SET);
        Ok(())
    }

    /// Source currently selected to feed the system clock.
    pub fn get_system_clock_source(&self) -> SystemClockSource {
        if self.registers.cswcfgr.is_set(CSWCFGR::SYS_SEL) {
            SystemClockSource::Osc400M
        } else {
            SystemClockSource::Osc8M
        }
    }

    /// Software view of the system clock frequency in Hz, computed from
    /// the selected source and the system divider. The high speed
    /// oscillator contributes the nominal frequency of the most recent
    /// trim load.
    pub fn get_system_frequency(&self) -> u32 {
        let base = match self.get_system_clock_source() {
            SystemClockSource::Osc8M => OSC8M_HZ,
            SystemClockSource::Osc400M => self.hsosc_nominal_hz.get(),
        };
        base / (self.registers.scdivr.read(SCDIVR::SYS_DIV) + 1)
    }

    /// One-call clock bring-up for boot: trim the high speed oscillator
    /// to 320 MHz, switch the system clock onto it, and run the IPS bus
    /// at half the system clock.
    pub fn setup_system_clock(&self) -> Result<(), ErrorCode> {
        self.set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz)?;
        self.set_system_clock(SystemClockSource::Osc400M, BOOT_SWITCH_TIMEOUT_MS)?;
        self.set_ips_clock_divider(1)
    }

    /// Pick the OTP redundancy partition whose trim words to use. The
    /// highest numbered partition carrying the signature wins; partition
    /// 2 is also the fallback when no signature matches.
    fn pick_otp_partition(&self) -> usize {
        if self.otp.partition_valid[2].get() == OTP_PARTITION_SIGNATURE {
            2
        } else if self.otp.partition_valid[1].get() == OTP_PARTITION_SIGNATURE {
            1
        } else if self.otp.partition_valid[0].get() == OTP_PARTITION_SIGNATURE {
            0
        } else {
            2
        }
    }

    /// Enable key and trim value words of a 320 MHz trim partition.
    fn trim320_words(&self, partition: usize) -> (u32, u32) {
        match partition {
            0 => (self.otp.trim320_enable_0.get(), self.otp.trim320_value_0.get()),
            1 => (self.otp.trim320_enable_1.get(), self.otp.trim320_value_1.get()),
            _ => (self.otp.trim320_enable_2.get(), self.otp.trim320_value_2.get()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;

    const OTP_TRIM400_OFFSET: usize = 0x0E4;
    const OTP_PART0_VALUE: usize = 0x700;
    const OTP_PART0_ENABLE: usize = 0x704;
    const OTP_PART1_VALUE: usize = 0x760;
    const OTP_PART1_ENABLE: usize = 0x764;
    const OTP_PART2_VALUE: usize = 0x7C0;
    const OTP_PART2_ENABLE: usize = 0x7C4;
    const OTP_PART0_VALID: usize = 0x7F0;
    const OTP_PART1_VALID: usize = 0x7F4;
    const OTP_PART2_VALID: usize = 0x7F8;

    struct Fixture {
        cpm: Cpm,
        otp_mem: *mut u32,
    }

    fn fixture() -> Fixture {
        let cpm_mem = Box::leak(Box::new([0u32; 0xE8 / 4])).as_mut_ptr();
        let otp_mem = Box::leak(Box::new([0u32; 0x800 / 4])).as_mut_ptr();
        Fixture {
            cpm: Cpm {
                registers: unsafe { StaticRef::new(cpm_mem as *const CpmRegisters) },
                otp: unsafe { StaticRef::new(otp_mem as *const OtpRegisters) },
                hsosc_nominal_hz: Cell::new(HSOSC_DEFAULT_HZ),
            },
            otp_mem,
        }
    }

    impl Fixture {
        /// Seed a read-only fuse word, standing in for the factory
        /// programming pass.
        fn poke_otp(&self, byte_offset: usize, value: u32) {
            unsafe { self.otp_mem.add(byte_offset / 4).write_volatile(value) };
        }

        /// Report the 8 MHz oscillator as stable and acknowledged, the
        /// state hardware settles into on a completed switch.
        fn settle_osc8m(&self) {
            let regs = &self.cpm.registers;
            regs.ocsr.modify(OCSR::OSC8M_STABLE::SET);
            regs.cswcfgr.modify(CSWCFGR::SYS_SEL_ST_OSC8M::SET);
        }

        /// Report the high speed oscillator as stable and acknowledged.
        fn settle_osc400m(&self) {
            let regs = &self.cpm.registers;
            regs.ocsr.modify(OCSR::OSC400M_STABLE::SET);
            regs.cswcfgr.modify(CSWCFGR::SYS_SEL_ST_OSC400M::SET);
        }
    }

    #[test]
    fn ips_divider_programs_field_and_update_strobe() {
        let f = fixture();
        for divider in 0..=0xF {
            assert_eq!(f.cpm.set_ips_clock_divider(divider), Ok(()));
            assert_eq!(f.cpm.registers.pcdivr1.read(PCDIVR1::IPS_DIV), divider);
        }
        assert!(f.cpm.registers.cdivenr.is_set(CDIVENR::IPS_DIVEN));
        assert!(f.cpm.registers.cdivupdr.is_set(CDIVUPDR::PERDIV_UPD));
    }

    #[test]
    fn ips_divider_rejects_values_above_field_range() {
        let f = fixture();
        assert_eq!(f.cpm.set_ips_clock_divider(16), Err(ErrorCode::FAIL));
        assert_eq!(f.cpm.registers.pcdivr1.get(), 0);
        assert_eq!(f.cpm.registers.cdivenr.get(), 0);
        assert_eq!(f.cpm.registers.cdivupdr.get(), 0);
    }

    #[test]
    fn ips_divider_preserves_sibling_divider_fields() {
        let f = fixture();
        f.cpm
            .registers
            .pcdivr1
            .modify(PCDIVR1::AHB3_DIV.val(5) + PCDIVR1::ARITH_DIV.val(7));
        assert_eq!(f.cpm.set_ips_clock_divider(4), Ok(()));
        assert_eq!(f.cpm.registers.pcdivr1.read(PCDIVR1::IPS_DIV), 4);
        assert_eq!(f.cpm.registers.pcdivr1.read(PCDIVR1::AHB3_DIV), 5);
        assert_eq!(f.cpm.registers.pcdivr1.read(PCDIVR1::ARITH_DIV), 7);
    }

    #[test]
    fn system_frequency_divides_selected_source() {
        let f = fixture();
        f.cpm.registers.scdivr.modify(SCDIVR::SYS_DIV.val(3));
        assert_eq!(f.cpm.get_system_frequency(), 2_000_000);

        f.cpm.registers.cswcfgr.modify(CSWCFGR::SYS_SEL::Osc400M);
        f.cpm.registers.scdivr.modify(SCDIVR::SYS_DIV.val(0));
        assert_eq!(f.cpm.get_system_frequency(), 320_000_000);
    }

    #[test]
    fn clock_switch_completes_when_source_reports_ready() {
        let f = fixture();
        f.settle_osc400m();
        assert_eq!(
            f.cpm.set_system_clock(SystemClockSource::Osc400M, 1),
            Ok(())
        );
        assert!(f.cpm.registers.ocsr.is_set(OCSR::OSC400M_EN));
        assert_eq!(
            f.cpm.get_system_clock_source(),
            SystemClockSource::Osc400M
        );
    }

    #[test]
    fn clock_switch_times_out_when_oscillator_never_stabilizes() {
        let f = fixture();
        assert_eq!(
            f.cpm.set_system_clock(SystemClockSource::Osc400M, 1),
            Err(ErrorCode::TIMEOUT)
        );
        // The enable request went out, but no switch was attempted.
        assert!(f.cpm.registers.ocsr.is_set(OCSR::OSC400M_EN));
        assert_eq!(f.cpm.get_system_clock_source(), SystemClockSource::Osc8M);
    }

    #[test]
    fn clock_switch_times_out_when_select_status_never_confirms() {
        let f = fixture();
        f.cpm.registers.ocsr.modify(OCSR::OSC400M_STABLE::SET);
        assert_eq!(
            f.cpm.set_system_clock(SystemClockSource::Osc400M, 1),
            Err(ErrorCode::TIMEOUT)
        );
        // The select was requested and remains requested.
        assert!(f.cpm.registers.cswcfgr.is_set(CSWCFGR::SYS_SEL));
    }

    #[test]
    fn zero_timeout_budget_still_succeeds_on_ready_source() {
        let f = fixture();
        f.settle_osc8m();
        assert_eq!(f.cpm.set_system_clock(SystemClockSource::Osc8M, 0), Ok(()));
    }

    #[test]
    fn bounded_wait_budget_is_proportional_to_milliseconds() {
        let calls = Cell::new(0u32);
        let result = wait_for(2, || {
            calls.set(calls.get() + 1);
            false
        });
        assert_eq!(result, Err(ErrorCode::TIMEOUT));
        assert_eq!(calls.get(), 2 * POLL_ITERATIONS_PER_MS + 1);
    }

    #[test]
    fn trim_320m_uses_highest_valid_partition() {
        let f = fixture();
        f.settle_osc8m();
        f.poke_otp(OTP_PART1_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART1_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART1_VALUE, 0x1111);
        f.poke_otp(OTP_PART2_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART2_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART2_VALUE, 0x2222);

        f.cpm.hsosc_nominal_hz.set(0);
        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz),
            Ok(())
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0x2222);
        assert_eq!(f.cpm.hsosc_nominal_hz.get(), 320_000_000);
        // The trim leaves the system parked on the safe oscillator.
        assert_eq!(f.cpm.get_system_clock_source(), SystemClockSource::Osc8M);
    }

    #[test]
    fn trim_320m_prefers_partition_one_over_zero() {
        let f = fixture();
        f.settle_osc8m();
        f.poke_otp(OTP_PART0_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART0_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART0_VALUE, 0x0A0A);
        f.poke_otp(OTP_PART1_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART1_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART1_VALUE, 0x1B1B);

        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz),
            Ok(())
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0x1B1B);
    }

    #[test]
    fn trim_320m_falls_back_to_partition_two() {
        let f = fixture();
        f.settle_osc8m();
        // No partition carries the signature; partition 2's words are
        // still consulted.
        f.poke_otp(OTP_PART2_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART2_VALUE, 0x3C3C);

        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz),
            Ok(())
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0x3C3C);
    }

    #[test]
    fn trim_320m_fails_closed_on_missing_enable_key() {
        let f = fixture();
        f.settle_osc8m();
        f.poke_otp(OTP_PART2_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART2_VALUE, 0x4D4D);

        f.cpm.hsosc_nominal_hz.set(0);
        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz),
            Err(ErrorCode::FAIL)
        );
        // No trim write, no override window, no frequency change, and
        // the system stays on the 8 MHz oscillator.
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0);
        assert_eq!(f.cpm.registers.vccctmr.get(), 0);
        assert_eq!(f.cpm.hsosc_nominal_hz.get(), 0);
        assert_eq!(f.cpm.get_system_clock_source(), SystemClockSource::Osc8M);
    }

    #[test]
    fn trim_400m_loads_tagged_fuse_word() {
        let f = fixture();
        f.settle_osc8m();
        f.poke_otp(OTP_TRIM400_OFFSET, 0x92015ACE);

        f.cpm.hsosc_nominal_hz.set(0);
        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency400MHz),
            Ok(())
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0x92015ACE);
        assert_eq!(f.cpm.hsosc_nominal_hz.get(), 400_000_000);
    }

    #[test]
    fn trim_400m_rejects_untagged_fuse_word() {
        let f = fixture();
        f.settle_osc8m();
        f.poke_otp(OTP_TRIM400_OFFSET, 0x12015ACE);

        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency400MHz),
            Err(ErrorCode::FAIL)
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0);
        assert_eq!(f.cpm.registers.vccctmr.get(), 0);
    }

    #[test]
    fn trim_relocks_override_key_after_write() {
        let f = fixture();
        f.settle_osc8m();
        f.poke_otp(OTP_PART2_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART2_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART2_VALUE, 0x5E5E);

        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz),
            Ok(())
        );
        let vccctmr = &f.cpm.registers.vccctmr;
        assert_eq!(vccctmr.read(VCCCTMR::CORE_TEST_KEY), 0b00);
        // Re-locking clears the key, not the override select.
        assert!(vccctmr.is_set(VCCCTMR::OVERWR_OSC400M_TRIM));
    }

    #[test]
    fn trim_aborts_without_touching_otp_when_safe_switch_fails() {
        let f = fixture();
        f.poke_otp(OTP_PART2_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART2_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART2_VALUE, 0x6F6F);

        assert_eq!(
            f.cpm
                .set_high_speed_osc_trim(OscillatorFrequency::Frequency320MHz),
            Err(ErrorCode::TIMEOUT)
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0);
        assert_eq!(f.cpm.registers.vccctmr.get(), 0);
    }

    #[test]
    fn boot_clock_setup_lands_on_high_speed_oscillator() {
        let f = fixture();
        f.settle_osc8m();
        f.settle_osc400m();
        f.poke_otp(OTP_PART2_VALID, OTP_PARTITION_SIGNATURE);
        f.poke_otp(OTP_PART2_ENABLE, OTP_TRIM320_KEY);
        f.poke_otp(OTP_PART2_VALUE, 0x7A7A);

        assert_eq!(f.cpm.setup_system_clock(), Ok(()));
        assert_eq!(
            f.cpm.get_system_clock_source(),
            SystemClockSource::Osc400M
        );
        assert_eq!(f.cpm.registers.o400mtrimr.get(), 0x7A7A);
        assert_eq!(f.cpm.registers.pcdivr1.read(PCDIVR1::IPS_DIV), 1);
        assert!(f.cpm.registers.cdivupdr.is_set(CDIVUPDR::PERDIV_UPD));
        assert_eq!(f.cpm.get_system_frequency(), 320_000_000);
    }
}
