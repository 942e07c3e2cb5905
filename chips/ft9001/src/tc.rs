// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2025.

//! Timer/counter (TC).
//!
//! A 16 bit counter fed by a prescaled system clock. The counter runs
//! toward the programmed modulus, raises a match flag that can
//! interrupt, and either reloads for periodic operation or counts once.

use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

use crate::StaticRef;

register_structs! {
    /// Timer/counter
    TcRegisters {
        /// Timer Control Register
        (0x000 => tccr: ReadWrite<u16, TCCR::Register>),
        /// Timer Modulus Register
        (0x002 => tcmr: ReadWrite<u16>),
        /// Timer Count Register
        (0x004 => tccntr: ReadOnly<u16>),
        (0x006 => @END),
    }
}

register_bitfields![u16,
    TCCR [
        /// Stop the counter
        STOP OFFSET(0) NUMBITS(1) [],
        /// Suspend the counter while the core is halted for debug
        DBG OFFSET(1) NUMBITS(1) [],
        /// Suspend the counter in doze mode
        DOZE OFFSET(2) NUMBITS(1) [],
        /// Suspend the counter in wait mode
        WAIT OFFSET(3) NUMBITS(1) [],
        /// Restart counting after a match
        RN OFFSET(4) NUMBITS(1) [],
        /// Load the modulus into the running count; self-clears
        CU OFFSET(5) NUMBITS(1) [],
        /// Match interrupt enable
        IE OFFSET(6) NUMBITS(1) [],
        /// Match flag; write one to clear
        IF OFFSET(7) NUMBITS(1) [],
        /// Input clock prescaler select
        WDP OFFSET(8) NUMBITS(3) []
    ],
];

const TC_BASE: StaticRef<TcRegisters> =
    unsafe { StaticRef::new(0x4000_6000 as *const TcRegisters) };

/// Input clock divider. Encoding 0 selects the largest divider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPrescaler {
    Div2048 = 0,
    Div1024 = 1,
    Div512 = 2,
    Div256 = 3,
    Div128 = 4,
    Div64 = 5,
    Div32 = 6,
    Div16 = 7,
}

/// Counting behavior after a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerMode {
    /// Reload and keep counting after each match
    Periodic,
    /// Count to the match without reloading
    OneShot,
}

pub struct Tc {
    registers: StaticRef<TcRegisters>,
}

impl Tc {
    pub const fn new() -> Tc {
        Tc { registers: TC_BASE }
    }

    /// Start the counter. Also clears every halt selection.
    pub fn start(&self) {
        self.registers.tccr.modify(
            TCCR::STOP::CLEAR + TCCR::DBG::CLEAR + TCCR::DOZE::CLEAR + TCCR::WAIT::CLEAR,
        );
    }

    pub fn stop(&self) {
        self.registers.tccr.modify(TCCR::STOP::SET);
    }

    /// Select which halted core states suspend the counter. Replaces
    /// the previous selection.
    pub fn set_halt_conditions(&self, debug: bool, doze: bool, wait: bool) {
        self.registers.tccr.modify(
            TCCR::DBG.val(debug as u16) + TCCR::DOZE.val(doze as u16) + TCCR::WAIT.val(wait as u16),
        );
    }

    pub fn set_mode(&self, mode: TimerMode) {
        match mode {
            TimerMode::Periodic => self.registers.tccr.modify(TCCR::RN::SET),
            TimerMode::OneShot => self.registers.tccr.modify(TCCR::RN::CLEAR),
        }
    }

    pub fn set_prescaler(&self, prescaler: TimerPrescaler) {
        self.registers.tccr.modify(TCCR::WDP.val(prescaler as u16));
    }

    /// Program the match modulus and load it into the running count.
    pub fn set_reload(&self, modulus: u16) {
        self.registers.tcmr.set(modulus);
        self.registers.tccr.modify(TCCR::CU::SET);
    }

    pub fn reload(&self) -> u16 {
        self.registers.tcmr.get()
    }

    /// Current value of the counter.
    pub fn counter(&self) -> u16 {
        self.registers.tccntr.get()
    }

    pub fn enable_interrupt(&self) {
        self.registers.tccr.modify(TCCR::IE::SET);
    }

    pub fn disable_interrupt(&self) {
        self.registers.tccr.modify(TCCR::IE::CLEAR);
    }

    pub fn is_pending(&self) -> bool {
        self.registers.tccr.is_set(TCCR::IF)
    }

    /// Acknowledge the match flag. The flag clears on a one write.
    pub fn clear_pending(&self) {
        self.registers.tccr.modify(TCCR::IF::SET);
    }
}
