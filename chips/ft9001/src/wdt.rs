// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Watchdog timer.
//!
//! The watchdog counts toward the programmed modulus and resets the
//! chip when the count expires. Servicing it takes a two key write
//! sequence through the service register. The control register selects
//! which halted core states suspend the counter.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use crate::StaticRef;

register_structs! {
    /// Watchdog timer
    WdtRegisters {
        /// Watchdog Control Register
        (0x000 => wcr: ReadWrite<u16, WCR::Register>),
        /// Watchdog Modulus Register
        (0x002 => wmr: ReadWrite<u16>),
        /// Watchdog Count Register
        (0x004 => wcntr: ReadOnly<u16>),
        /// Watchdog Service Register
        (0x006 => wsr: ReadWrite<u16>),
        (0x008 => @END),
    }
}

register_bitfields![u16,
    WCR [
        /// Watchdog enable
        EN OFFSET(0) NUMBITS(1) [],
        /// Suspend the counter while the core is halted for debug
        DBG OFFSET(1) NUMBITS(1) [],
        /// Suspend the counter in doze mode
        DOZE OFFSET(2) NUMBITS(1) [],
        /// Suspend the counter in wait mode
        WAIT OFFSET(3) NUMBITS(1) []
    ],
];

const WDT_BASE: StaticRef<WdtRegisters> =
    unsafe { StaticRef::new(0x4000_5000 as *const WdtRegisters) };

const REFRESH_KEY_FIRST: u16 = 0x5555;
const REFRESH_KEY_SECOND: u16 = 0xAAAA;

pub struct Wdt {
    registers: StaticRef<WdtRegisters>,
}

impl Wdt {
    pub const fn new() -> Wdt {
        Wdt {
            registers: WDT_BASE,
        }
    }

    pub fn enable(&self) {
        self.registers.wcr.modify(WCR::EN::SET);
    }

    pub fn disable(&self) {
        self.registers.wcr.modify(WCR::EN::CLEAR);
    }

    pub fn is_enabled(&self) -> bool {
        self.registers.wcr.is_set(WCR::EN)
    }

    /// Select which halted core states suspend the counter. Replaces
    /// the previous selection.
    pub fn set_halt_conditions(&self, debug: bool, doze: bool, wait: bool) {
        self.registers.wcr.modify(
            WCR::DBG.val(debug as u16) + WCR::DOZE.val(doze as u16) + WCR::WAIT.val(wait as u16),
        );
    }

    /// Program the timeout modulus. The hardware also reloads the
    /// running count whenever the modulus is written.
    pub fn set_reload(&self, modulus: u16) {
        self.registers.wmr.set(modulus);
    }

    pub fn reload(&self) -> u16 {
        self.registers.wmr.get()
    }

    /// Current value of the watchdog counter.
    pub fn counter(&self) -> u16 {
        self.registers.wcntr.get()
    }

    /// Service the watchdog. The two key writes must reach the service
    /// register back to back; an interleaved write restarts the
    /// sequence.
    pub fn tickle(&self) {
        self.registers.wsr.set(REFRESH_KEY_FIRST);
        self.registers.wsr.set(REFRESH_KEY_SECOND);
    }
}
