// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-remote boot-configuration register block: the boot-entry address
//! register and the CPU core reset control/status pair used by the
//! attach/start/stop sequences of §4.4, distinct from the IVA power
//! domain's internal sub-reset bits programmed by [`crate::power`].

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

register_bitfields! [
    u32,

    pub RSTCTRL [
        CPU_RST OFFSET(0) NUMBITS(1) [],
    ],

    pub RSTST [
        CPU_RSTST OFFSET(0) NUMBITS(1) [],
    ],
];

register_structs! {
    /// One remote core's boot-config register file.
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => BOOTADDR: ReadWrite<u32>),
        (0x04 => RSTCTRL: ReadWrite<u32, RSTCTRL::Register>),
        (0x08 => RSTST: ReadOnly<u32, RSTST::Register>),
        (0x0C => @END),
    }
}

impl RegisterBlock {
    /// Writes the entry point the core will fetch from on release.
    pub fn set_boot_entry(&self, entry: u32) {
        self.BOOTADDR.set(entry);
    }

    /// Asserts the CPU reset line (holds the core in reset).
    pub fn assert_reset(&self) {
        self.RSTCTRL.write(RSTCTRL::CPU_RST::SET);
    }

    /// Releases the CPU reset line and polls, bounded by `max_polls`, for
    /// the reset-status bit to clear. Returns `false` on timeout.
    pub fn release_reset(&self, max_polls: u32) -> bool {
        self.RSTCTRL.write(RSTCTRL::CPU_RST::CLEAR);
        for _ in 0..max_polls {
            if !self.RSTST.is_set(RSTST::CPU_RSTST) {
                return true;
            }
        }
        !self.RSTST.is_set(RSTST::CPU_RSTST)
    }

    /// Whether the core is currently held in reset.
    pub fn in_reset(&self) -> bool {
        self.RSTCTRL.matches_all(RSTCTRL::CPU_RST::SET)
    }
}
