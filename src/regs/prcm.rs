// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! PRCM (power, reset, and clock management) register block covering the
//! subset of the IVA/DSP/IPU power-domain bring-up sequence described in
//! §4.5: module-mode control, idle-status readback, clock-stop control, and
//! sub-reset release.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::ReadWrite;
use tock_registers::{register_bitfields, register_structs};

register_bitfields! [
    u32,

    pub CLKSTCTRL [
        CLKTRCTRL OFFSET(0) NUMBITS(2) [
            NoSleep = 0b00,
            SwSleep = 0b01,
            SwWakeup = 0b10,
            HwAuto = 0b11,
        ],
    ],

    pub CLKCTRL [
        MODULEMODE OFFSET(0) NUMBITS(2) [
            Disabled = 0b00,
            Enabled = 0b10,
        ],
        IDLEST OFFSET(16) NUMBITS(2) [
            Functional = 0b00,
            Transition = 0b01,
            Idle = 0b10,
            Disabled = 0b11,
        ],
    ],

    pub PWRSTCTRL [
        POWERSTATE OFFSET(0) NUMBITS(2) [
            Off = 0b00,
            Ret = 0b01,
            OnInactive = 0b10,
            On = 0b11,
        ],
        LOGICRETSTATE OFFSET(2) NUMBITS(1) [],
    ],

    pub PWRSTST [
        POWERSTATEST OFFSET(0) NUMBITS(2) [],
        LOGICSTATEST OFFSET(2) NUMBITS(1) [],
    ],

    pub RSTCTRL [
        RST1 OFFSET(0) NUMBITS(1) [],
        RST2 OFFSET(1) NUMBITS(1) [],
        RST3 OFFSET(2) NUMBITS(1) [],
    ],

    pub RSTST [
        RST1ST OFFSET(0) NUMBITS(1) [],
        RST2ST OFFSET(1) NUMBITS(1) [],
        RST3ST OFFSET(2) NUMBITS(1) [],
    ],

    pub CONTEXT [
        LOSTCONTEXT_RFF OFFSET(0) NUMBITS(1) [],
        LOSTMEM OFFSET(1) NUMBITS(1) [],
    ],
];

register_structs! {
    /// One power domain's PRCM register file (IVA, DSP, or an IPU core).
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => PWRSTCTRL: ReadWrite<u32, PWRSTCTRL::Register>),
        (0x04 => PWRSTST: ReadWrite<u32, PWRSTST::Register>),
        (0x08 => CLKSTCTRL: ReadWrite<u32, CLKSTCTRL::Register>),
        (0x0C => RSTCTRL: ReadWrite<u32, RSTCTRL::Register>),
        (0x10 => RSTST: ReadWrite<u32, RSTST::Register>),
        (0x14 => CLKCTRL_CORE: ReadWrite<u32, CLKCTRL::Register>),
        (0x18 => CLKCTRL_SL2: ReadWrite<u32, CLKCTRL::Register>),
        (0x1C => CONTEXT: ReadWrite<u32, CONTEXT::Register>),
        (0x20 => @END),
    }
}

impl RegisterBlock {
    /// Clears the context-lost flag (step 1 of the ordered IVA bring-up).
    pub fn clear_context_lost(&self) {
        self.CONTEXT
            .write(CONTEXT::LOSTCONTEXT_RFF::CLEAR + CONTEXT::LOSTMEM::CLEAR);
    }

    /// Returns whether the core clock domain's idle-status reads functional.
    pub fn core_clock_functional(&self) -> bool {
        self.CLKCTRL_CORE.matches_all(CLKCTRL::IDLEST::Functional)
    }

    /// Returns whether the SL2 clock domain's idle-status reads functional.
    pub fn sl2_clock_functional(&self) -> bool {
        self.CLKCTRL_SL2.matches_all(CLKCTRL::IDLEST::Functional)
    }
}
