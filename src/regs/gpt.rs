// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! General-purpose timer register block, used by the watchdog (C7) to
//! detect an unresponsive remote core. One GPT is dedicated per remote.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

register_bitfields! [
    u32,

    pub TCLR [
        ST OFFSET(0) NUMBITS(1) [],
        AR OFFSET(1) NUMBITS(1) [],
        CE OFFSET(6) NUMBITS(1) [],
        TRG OFFSET(10) NUMBITS(2) [
            NoTrigger = 0b00,
            OverflowTrigger = 0b01,
            OverflowAndMatchTrigger = 0b10,
        ],
        IDLEMODE OFFSET(3) NUMBITS(2) [
            ForceIdle = 0b00,
            NoIdle = 0b01,
            SmartIdle = 0b10,
        ],
    ],

    pub IRQ [
        OVF_IT_FLAG OFFSET(1) NUMBITS(1) [],
    ],
];

register_structs! {
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => TIDR: ReadOnly<u32>),
        (0x04 => _reserved0),
        (0x10 => TIOCP_CFG: ReadWrite<u32>),
        (0x14 => _reserved1),
        (0x28 => IRQSTATUS: ReadWrite<u32, IRQ::Register>),
        (0x2C => IRQENABLE: ReadWrite<u32, IRQ::Register>),
        (0x30 => _reserved2),
        (0x38 => TCLR: ReadWrite<u32, TCLR::Register>),
        (0x3C => TCRR: ReadWrite<u32>),
        (0x40 => TLDR: ReadWrite<u32>),
        (0x44 => TTGR: WriteOnly<u32>),
        (0x48 => @END),
    }
}

impl RegisterBlock {
    /// Arms the timer to overflow after `reload`'s worth of ticks,
    /// auto-reloading and routing overflow to the interrupt line.
    pub fn start_overflow_watchdog(&self, reload: u32) {
        self.TLDR.set(reload);
        self.TCRR.set(reload);
        self.IRQENABLE.modify(IRQ::OVF_IT_FLAG::SET);
        self.TCLR.write(
            TCLR::ST::SET
                + TCLR::AR::SET
                + TCLR::IDLEMODE::SmartIdle
                + TCLR::TRG::OverflowTrigger,
        );
    }

    /// Stops the timer and disables its overflow interrupt.
    pub fn stop(&self) {
        self.TCLR.modify(TCLR::ST::CLEAR);
        self.IRQENABLE.modify(IRQ::OVF_IT_FLAG::CLEAR);
    }

    /// Acknowledges a pending overflow interrupt.
    pub fn clear_overflow_irq(&self) {
        self.IRQSTATUS.write(IRQ::OVF_IT_FLAG::SET);
    }

    /// Returns whether an overflow interrupt is currently pending.
    pub fn overflow_pending(&self) -> bool {
        self.IRQSTATUS.is_set(IRQ::OVF_IT_FLAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::interfaces::ReadWriteable;
    use tock_registers::registers::InMemoryRegister;

    #[test]
    fn overflow_irq_roundtrip() {
        let reg: InMemoryRegister<u32, IRQ::Register> = InMemoryRegister::new(0);
        assert!(!reg.is_set(IRQ::OVF_IT_FLAG));
        reg.modify(IRQ::OVF_IT_FLAG::SET);
        assert!(reg.is_set(IRQ::OVF_IT_FLAG));
    }
}
