// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Slave L2 MMU register block: table-walk base, enable/reset control, and
//! the direct TLB-victim load/readback window used by
//! [`crate::mmu::MmuContext::save_context`]/`restore_context`.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite, WriteOnly};
use tock_registers::{register_bitfields, register_structs};

/// Number of 32-bit words snapshotted by `save_context`/`restore_context`.
pub const MMU_REG_COUNT: usize = 7;

/// Number of hardware TLB victim slots.
pub const MMU_TLB_SLOTS: usize = 32;

register_bitfields! [
    u32,

    pub SYSCONFIG [
        AUTOIDLE OFFSET(0) NUMBITS(1) [],
        SOFTRESET OFFSET(1) NUMBITS(1) [],
    ],

    pub SYSSTATUS [
        RESETDONE OFFSET(0) NUMBITS(1) [],
    ],

    pub CNTL [
        MMU_ENABLE OFFSET(1) NUMBITS(1) [],
        TWL_ENABLE OFFSET(2) NUMBITS(1) [],
    ],

    pub LOCK [
        BASE_VALUE OFFSET(10) NUMBITS(6) [],
        CUR_VICTIM OFFSET(4) NUMBITS(6) [],
    ],

    pub CAM [
        CAM_VA_TAG OFFSET(12) NUMBITS(20) [],
        PAGESIZE OFFSET(0) NUMBITS(2) [
            Section = 0b00,
            Large = 0b01,
            Small = 0b10,
            SuperSection = 0b11,
        ],
        VALID OFFSET(2) NUMBITS(1) [],
    ],

    pub RAM [
        RAM_PA OFFSET(12) NUMBITS(20) [],
        ENDIANNESS OFFSET(9) NUMBITS(1) [
            Little = 0,
            Big = 1,
        ],
        ELEMENT_SIZE OFFSET(7) NUMBITS(2) [
            Size8 = 0b00,
            Size16 = 0b01,
            Size32 = 0b10,
        ],
        MIXED OFFSET(6) NUMBITS(1) [],
    ],
];

register_structs! {
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => REVISION: ReadOnly<u32>),
        (0x04 => _reserved0),
        (0x10 => SYSCONFIG: ReadWrite<u32, SYSCONFIG::Register>),
        (0x14 => SYSSTATUS: ReadOnly<u32, SYSSTATUS::Register>),
        (0x18 => _reserved1),
        (0x40 => IRQSTATUS: ReadWrite<u32>),
        (0x44 => IRQENABLE: ReadWrite<u32>),
        (0x48 => _reserved2),
        (0x4C => WALKING_ST: ReadOnly<u32>),
        (0x50 => CNTL: ReadWrite<u32, CNTL::Register>),
        (0x54 => FAULT_AD: ReadOnly<u32>),
        (0x58 => TTB: ReadWrite<u32>),
        (0x5C => LOCK: ReadWrite<u32, LOCK::Register>),
        (0x60 => LD_TLB: WriteOnly<u32>),
        (0x64 => CAM: ReadWrite<u32, CAM::Register>),
        (0x68 => RAM: ReadWrite<u32, RAM::Register>),
        (0x6C => GFLUSH: WriteOnly<u32>),
        (0x70 => FLUSH_ENTRY: WriteOnly<u32>),
        (0x74 => READ_CAM: ReadOnly<u32, CAM::Register>),
        (0x78 => READ_RAM: ReadOnly<u32, RAM::Register>),
        (0x7C => EMU_FAULT_AD: ReadOnly<u32>),
        (0x80 => @END),
    }
}

impl RegisterBlock {
    /// Issues a soft reset and waits for completion, bounded by `max_polls`
    /// iterations. Returns `false` on timeout.
    pub fn soft_reset(&self, max_polls: u32) -> bool {
        self.SYSCONFIG.modify(SYSCONFIG::SOFTRESET::SET);
        for _ in 0..max_polls {
            if self.SYSSTATUS.is_set(SYSSTATUS::RESETDONE) {
                return true;
            }
        }
        self.SYSSTATUS.is_set(SYSSTATUS::RESETDONE)
    }

    /// Enables the MMU and its table-walk logic.
    pub fn enable(&self) {
        self.CNTL
            .write(CNTL::MMU_ENABLE::SET + CNTL::TWL_ENABLE::SET);
    }

    /// Disables the MMU.
    pub fn disable(&self) {
        self.CNTL.set(0);
    }

    /// Sets the L1 table-walk base address.
    pub fn set_ttb(&self, l1_phys: u32) {
        self.TTB.set(l1_phys);
    }

    /// Flushes the entire TLB.
    pub fn flush_all(&self) {
        self.GFLUSH.set(1);
    }

    /// Selects TLB victim slot `index` (0..32) for the next `CAM`/`RAM`
    /// load via [`RegisterBlock::load_tlb_entry`].
    pub fn set_victim(&self, index: u32) {
        self.LOCK.write(LOCK::CUR_VICTIM.val(index) + LOCK::BASE_VALUE.val(0));
    }

    /// Loads one TLB entry at the currently selected victim slot.
    pub fn load_tlb_entry(&self, cam: u32, ram: u32) {
        self.CAM.set(cam);
        self.RAM.set(ram);
        self.LD_TLB.set(1);
    }

    /// Reads back raw CAM/RAM words for victim slot `index`.
    pub fn read_tlb_entry(&self, index: u32) -> (u32, u32) {
        self.set_victim(index);
        (self.READ_CAM.get(), self.READ_RAM.get())
    }

    /// Snapshots the `MMU_REG_COUNT` non-TLB context words that must
    /// survive a power transition: IRQENABLE, CNTL, TTB, and the lock base.
    pub fn snapshot_words(&self) -> [u32; MMU_REG_COUNT] {
        [
            self.IRQENABLE.get(),
            self.CNTL.get(),
            self.TTB.get(),
            self.LOCK.get(),
            self.SYSCONFIG.get(),
            0,
            0,
        ]
    }

    /// Restores context words previously captured by
    /// [`RegisterBlock::snapshot_words`], leaving the MMU itself disabled
    /// (callers re-enable explicitly).
    pub fn restore_words(&self, words: &[u32; MMU_REG_COUNT]) {
        self.IRQENABLE.set(words[0]);
        self.CNTL.set(words[1]);
        self.TTB.set(words[2]);
        self.LOCK.set(words[3]);
        self.SYSCONFIG.set(words[4]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tock_registers::registers::InMemoryRegister;

    #[test]
    fn pagesize_encodings_match_hardware() {
        let reg: InMemoryRegister<u32, CAM::Register> = InMemoryRegister::new(0);
        reg.write(CAM::PAGESIZE::SuperSection);
        assert!(reg.matches_all(CAM::PAGESIZE::SuperSection));
        assert!(!reg.matches_all(CAM::PAGESIZE::Section));
    }
}
