// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Mailbox register block.
//!
//! Two blocks exist in hardware (A and B); constants here are bit-exact
//! with the original port (`VAYUIpcInt.c`): twelve message FIFOs, one
//! IRQSTATUS/IRQENABLE pair per user (host=2, DSP=0, IPU=1).

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

/// Number of message FIFO slots per mailbox block.
pub const MAILBOX_MAXNUM: u32 = 0xC;

/// Byte offset of the SYSCONFIG register.
pub const MAILBOX_SYSCONFIG_OFFSET: u32 = 0x10;

/// Base address of mailbox block 5 (host<->IPU on some VAYU variants).
pub const MAILBOX_5_BASE: u64 = 0x4884_0000;
/// Base address of mailbox block 6 (host<->DSP on some VAYU variants).
pub const MAILBOX_6_BASE: u64 = 0x4884_2000;

/// "User id" assigned to the host.
pub const MBOX_USER_HOST: u32 = 2;
/// "User id" assigned to the DSP remote.
pub const MBOX_USER_DSP: u32 = 0;
/// "User id" assigned to the IPU remote.
pub const MBOX_USER_IPU: u32 = 1;

/// FIFO index carrying DSP -> host messages.
pub const FIFO_DSP_TO_HOST: u32 = 1;
/// FIFO index carrying IPU -> host messages.
pub const FIFO_IPU_TO_HOST: u32 = 3;
/// FIFO index carrying host -> DSP messages.
pub const FIFO_HOST_TO_DSP: u32 = 4;
/// FIFO index carrying host -> IPU messages.
pub const FIFO_HOST_TO_IPU: u32 = 5;

/// Returns the byte offset of message FIFO `m`'s data register.
pub const fn message_offset(m: u32) -> u32 {
    0x40 + (m << 2)
}

/// Returns the byte offset of FIFO `m`'s status register.
pub const fn fifo_status_offset(m: u32) -> u32 {
    0x80 + (m << 2)
}

/// Returns the byte offset of `user`'s IRQSTATUS register.
pub const fn irq_status_offset(user: u32) -> u32 {
    0x104 + 0x10 * user
}

/// Returns the byte offset of `user`'s IRQENABLE register.
pub const fn irq_enable_offset(user: u32) -> u32 {
    0x108 + 0x10 * user
}

register_bitfields! [
    u32,

    pub SYSCONFIG [
        SMARTIDLE OFFSET(3) NUMBITS(2) [
            Force = 0b00,
            NoIdle = 0b01,
            Smart = 0b10,
        ],
        SOFTRESET OFFSET(0) NUMBITS(1) [],
    ],

    pub FIFOSTATUS [
        FIFOFULL OFFSET(0) NUMBITS(1) [],
    ],

    pub MSGSTATUS [
        NBOFMSG OFFSET(0) NUMBITS(7) [],
    ],
];

register_structs! {
    /// A single mailbox block's register file, sized generously to cover
    /// both FIFO data/status windows and the twelve-user IRQ window.
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => REVISION: ReadOnly<u32>),
        (0x04 => _reserved0),
        (0x10 => SYSCONFIG: ReadWrite<u32, SYSCONFIG::Register>),
        (0x14 => _reserved1),
        (0x40 => MESSAGE: [ReadWrite<u32>; 0xC]),
        (0x70 => _reserved2),
        (0x80 => FIFOSTATUS: [ReadOnly<u32, FIFOSTATUS::Register>; 0xC]),
        (0xB0 => _reserved3),
        (0xC0 => MSGSTATUS: [ReadOnly<u32, MSGSTATUS::Register>; 0xC]),
        (0xF0 => _reserved4),
        (0x100 => _reserved5),
        (0x104 => IRQSTATUS_0: ReadWrite<u32>),
        (0x108 => IRQENABLE_0: ReadWrite<u32>),
        (0x10C => _reserved6),
        (0x114 => IRQSTATUS_1: ReadWrite<u32>),
        (0x118 => IRQENABLE_1: ReadWrite<u32>),
        (0x11C => _reserved7),
        (0x124 => IRQSTATUS_2: ReadWrite<u32>),
        (0x128 => IRQENABLE_2: ReadWrite<u32>),
        (0x12C => _reserved8),
        (0x140 => @END),
    }
}

impl RegisterBlock {
    /// Returns the current message count in FIFO `m`.
    pub fn num_messages(&self, m: u32) -> u32 {
        self.MSGSTATUS[m as usize].read(MSGSTATUS::NBOFMSG)
    }

    /// Returns whether FIFO `m` is full.
    pub fn fifo_full(&self, m: u32) -> bool {
        self.FIFOSTATUS[m as usize].is_set(FIFOSTATUS::FIFOFULL)
    }

    /// Reads and consumes one word from FIFO `m`.
    pub fn read_message(&self, m: u32) -> u32 {
        self.MESSAGE[m as usize].get()
    }

    /// Writes one word to FIFO `m`.
    pub fn write_message(&self, m: u32, value: u32) {
        self.MESSAGE[m as usize].set(value);
    }

    fn irqstatus(&self, user: u32) -> &ReadWrite<u32> {
        match user {
            MBOX_USER_DSP => &self.IRQSTATUS_0,
            MBOX_USER_IPU => &self.IRQSTATUS_1,
            MBOX_USER_HOST => &self.IRQSTATUS_2,
            _ => unreachable!("mailbox user id out of range"),
        }
    }

    fn irqenable(&self, user: u32) -> &ReadWrite<u32> {
        match user {
            MBOX_USER_DSP => &self.IRQENABLE_0,
            MBOX_USER_IPU => &self.IRQENABLE_1,
            MBOX_USER_HOST => &self.IRQENABLE_2,
            _ => unreachable!("mailbox user id out of range"),
        }
    }

    /// Reads `user`'s IRQSTATUS word.
    pub fn irq_status(&self, user: u32) -> u32 {
        self.irqstatus(user).get()
    }

    /// Clears the given bits of `user`'s IRQSTATUS register (write-1-to-clear).
    pub fn clear_irq_status(&self, user: u32, bits: u32) {
        self.irqstatus(user).set(bits);
    }

    /// Reads `user`'s IRQENABLE word.
    pub fn irq_enable(&self, user: u32) -> u32 {
        self.irqenable(user).get()
    }

    /// Overwrites `user`'s IRQENABLE word.
    pub fn set_irq_enable(&self, user: u32, bits: u32) {
        self.irqenable(user).set(bits);
    }
}
