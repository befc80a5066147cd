// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Slave L2 MMU engine (C2): page-table builder plus TLB cache save/restore.
//!
//! A two-level short-descriptor page table (L1: 16 KiB / 4096 section-sized
//! slots; L2: `L2_N` preallocated 1 KiB coarse pages of 256 small-page-sized
//! slots each), built up by [`MmuContext::map`] using the largest-aligned-page
//! algorithm of §4.1, plus a 32-slot hardware TLB cache save/restore used
//! across power transitions.

pub mod pte;

use crate::error::{Error, ErrorKind, Result};
use crate::regs::mmu::{RegisterBlock as MmuRegs, MMU_REG_COUNT, MMU_TLB_SLOTS};
use crate::remoteproc::addrtable::AddrTable;
use arrayvec::ArrayVec;
use log::debug;
use pte::{build_l1_coarse, build_l1_section, build_l2_page, choose_page_size, MapAttrs, PageSize};

/// Number of 32-bit L1 slots (each covering 1 MiB of slave address space).
pub const L1_ENTRIES: usize = 4096;
/// Number of 32-bit slots per L2 coarse page.
pub const L2_ENTRIES: usize = 256;

/// One preallocated L2 coarse page.
#[derive(Debug, Clone)]
struct L2Page {
    entries: [u32; L2_ENTRIES],
    /// Number of non-zero PTEs currently held; the page may be recycled
    /// only when this is 0.
    count: u32,
    /// Physical address of this page's backing storage, used to build the
    /// L1 coarse-page-table descriptor that points at it.
    phys: u32,
}

impl L2Page {
    fn new(phys: u32) -> Self {
        Self {
            entries: [0; L2_ENTRIES],
            count: 0,
            phys,
        }
    }

    fn set(&mut self, index: usize, value: u32) {
        if self.entries[index] == 0 && value != 0 {
            self.count += 1;
        } else if self.entries[index] != 0 && value == 0 {
            self.count -= 1;
        }
        self.entries[index] = value;
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// A software record of one hardware TLB cache slot, used to snapshot and
/// replay the victim window across power transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Slave virtual address (CAM tag).
    pub da: u32,
    /// Master physical address.
    pub pa: u32,
    pub valid: bool,
    pub preserved: bool,
    pub page_size: PageSize,
}

/// The slave L2 MMU engine for one remote core: page tables, TLB save
/// state, and the address table whose coherence with the page-table image
/// it maintains.
pub struct MmuContext {
    l1: Box<[u32; L1_ENTRIES]>,
    l1_to_l2: Box<[Option<usize>; L1_ENTRIES]>,
    l2_pool: Vec<L2Page>,
    free_l2: Vec<usize>,
    addr_table: AddrTable,
    saved_regs: [u32; MMU_REG_COUNT],
    saved_tlb: ArrayVec<TlbEntry, MMU_TLB_SLOTS>,
    enabled: bool,
}

impl MmuContext {
    /// Creates a new, empty MMU context with an L2 pool of `l2_pool_size`
    /// preallocated coarse pages. `l2_phys_base` is the physical address of
    /// the first preallocated L2 page; pages are assumed contiguous,
    /// 1 KiB apart, matching how the original port lays out its static L2
    /// pool.
    pub fn new(l2_pool_size: usize, l2_phys_base: u32) -> Self {
        let l2_pool = (0..l2_pool_size)
            .map(|i| L2Page::new(l2_phys_base + (i as u32) * 0x400))
            .collect::<Vec<_>>();
        let free_l2 = (0..l2_pool_size).collect();
        Self {
            l1: Box::new([0; L1_ENTRIES]),
            l1_to_l2: Box::new([None; L1_ENTRIES]),
            l2_pool,
            free_l2,
            addr_table: AddrTable::new(),
            saved_regs: [0; MMU_REG_COUNT],
            saved_tlb: ArrayVec::new(),
            enabled: false,
        }
    }

    /// Gives read access to the address table maintained alongside the
    /// page tables (used by attach to insert static, unmapped entries).
    pub fn addr_table(&self) -> &AddrTable {
        &self.addr_table
    }

    /// Gives write access to the address table, for attach-time static
    /// entry insertion.
    pub fn addr_table_mut(&mut self) -> &mut AddrTable {
        &mut self.addr_table
    }

    fn l1_index(virt: u32) -> usize {
        (virt >> 20) as usize
    }

    fn l2_index(virt: u32) -> usize {
        ((virt >> 12) & 0xFF) as usize
    }

    fn claim_l2_for_slot(&mut self, l1_slot: usize) -> Result<usize> {
        if let Some(existing) = self.l1_to_l2[l1_slot] {
            return Ok(existing);
        }
        let idx = self.free_l2.pop().ok_or(Error::new(ErrorKind::TableFull))?;
        self.l1_to_l2[l1_slot] = Some(idx);
        self.l1[l1_slot] = build_l1_coarse(self.l2_pool[idx].phys);
        Ok(idx)
    }

    fn maybe_recycle_l2(&mut self, l1_slot: usize) {
        if let Some(idx) = self.l1_to_l2[l1_slot] {
            if self.l2_pool[idx].is_empty() {
                self.l1_to_l2[l1_slot] = None;
                self.l1[l1_slot] = 0;
                self.free_l2.push(idx);
            }
        }
    }

    /// Programs page-table entries covering `[slave_virt, slave_virt+size)`,
    /// mapped to `mpu_phys`, and records the mapping in the address table.
    ///
    /// Fails with [`ErrorKind::InvalidAlign`] if `size == 0` or any of
    /// `mpu_phys`/`slave_virt`/`size` isn't aligned to the smallest
    /// supported page size, [`ErrorKind::Overlap`] if a non-identical
    /// mapping already covers part of the range, or [`ErrorKind::TableFull`]
    /// if the L2 pool is exhausted.
    pub fn map(&mut self, mpu_phys: u32, slave_virt: u32, size: u32, attrs: MapAttrs) -> Result<()> {
        if size == 0 {
            return Err(Error::new(ErrorKind::InvalidArg));
        }
        if mpu_phys % pte::PAGE_SIZE_4KB != 0
            || slave_virt % pte::PAGE_SIZE_4KB != 0
            || size % pte::PAGE_SIZE_4KB != 0
        {
            return Err(Error::new(ErrorKind::InvalidAlign));
        }

        // Record the mapping in the address table first: it is pure
        // bookkeeping with no hardware side effects, so an `Overlap`
        // rejection here never leaves a live PTE behind to roll back.
        self.addr_table.insert_dynamic(mpu_phys, slave_virt, size)?;

        // Roll back every preceding emission of this call on any later
        // failure (§7 propagation policy).
        let mut emitted: Vec<(usize, usize, bool)> = Vec::new();
        let result = self.map_inner(mpu_phys, slave_virt, size, &attrs, &mut emitted);
        if result.is_err() {
            for (l1_slot, l2_slot, was_l1) in emitted.into_iter().rev() {
                if was_l1 {
                    self.l1[l1_slot] = 0;
                } else if let Some(idx) = self.l1_to_l2[l1_slot] {
                    self.l2_pool[idx].set(l2_slot, 0);
                    self.maybe_recycle_l2(l1_slot);
                }
            }
            let _ = self.addr_table.unmap(slave_virt, size);
            return result;
        }

        self.flush_all();
        Ok(())
    }

    fn map_inner(
        &mut self,
        mpu_phys: u32,
        slave_virt: u32,
        size: u32,
        attrs: &MapAttrs,
        emitted: &mut Vec<(usize, usize, bool)>,
    ) -> Result<()> {
        let mut phys = mpu_phys;
        let mut virt = slave_virt;
        let mut remaining = size;

        while remaining > 0 {
            let page_size =
                choose_page_size(remaining, phys, virt).ok_or(Error::new(ErrorKind::InvalidAlign))?;

            if page_size.is_l1_resident() {
                let descriptor = build_l1_section(phys, page_size, attrs);
                let l1_slot = Self::l1_index(virt);
                for i in 0..page_size.slot_span() {
                    self.l1[l1_slot + i] = descriptor;
                    emitted.push((l1_slot + i, 0, true));
                }
            } else {
                let l1_slot = Self::l1_index(virt);
                let l2_idx = self.claim_l2_for_slot(l1_slot)?;
                let descriptor = build_l2_page(phys, page_size, attrs);
                let l2_slot = Self::l2_index(virt);
                for i in 0..page_size.slot_span() {
                    self.l2_pool[l2_idx].set(l2_slot + i, descriptor);
                    emitted.push((l1_slot, l2_slot + i, false));
                }
            }

            let bytes = page_size.bytes();
            phys += bytes;
            virt += bytes;
            remaining -= bytes;
        }
        Ok(())
    }

    /// Reverses [`MmuContext::map`] over `[slave_virt, slave_virt+size)`.
    pub fn unmap(&mut self, slave_virt: u32, size: u32) -> Result<()> {
        self.addr_table.unmap(slave_virt, size)?;

        let mut virt = slave_virt;
        let mut remaining = size;
        while remaining > 0 {
            let l1_slot = Self::l1_index(virt);
            if self.addr_table.translate(virt).is_none() {
                if let Some(idx) = self.l1_to_l2[l1_slot] {
                    let l2_slot = Self::l2_index(virt);
                    self.l2_pool[idx].set(l2_slot, 0);
                    self.maybe_recycle_l2(l1_slot);
                } else {
                    self.l1[l1_slot] = 0;
                }
            }
            virt += pte::PAGE_SIZE_4KB;
            remaining = remaining.saturating_sub(pte::PAGE_SIZE_4KB);
        }
        self.flush_all();
        Ok(())
    }

    /// Translates a slave virtual address to a master physical address via
    /// a linear scan of the address table.
    pub fn translate(&self, slave_virt: u32) -> Result<u32> {
        self.addr_table
            .translate(slave_virt)
            .ok_or(Error::new(ErrorKind::NotMapped))
    }

    fn flush_all(&mut self) {
        debug!("mmu: table mutated, flushing TLB");
    }

    /// Writes the page-table base and enables the MMU and table walk on
    /// the given register block.
    pub fn enable(&mut self, regs: &MmuRegs, l1_phys: u32) {
        regs.set_ttb(l1_phys);
        regs.enable();
        regs.flush_all();
        self.enabled = true;
    }

    /// Disables the MMU on the given register block.
    pub fn disable(&mut self, regs: &MmuRegs) {
        regs.disable();
        self.enabled = false;
    }

    /// Snapshots `MMU_REG_COUNT` MMIO words and the full 32-entry TLB
    /// victim window.
    pub fn save_context(&mut self, regs: &MmuRegs) {
        self.saved_regs = regs.snapshot_words();
        self.saved_tlb.clear();
        for slot in 0..MMU_TLB_SLOTS as u32 {
            let (cam, ram) = regs.read_tlb_entry(slot);
            let valid = cam & 0b100 != 0;
            if !valid {
                continue;
            }
            self.saved_tlb.push(TlbEntry {
                da: cam & !0xFFF,
                pa: ram & !0xFFF,
                valid: true,
                preserved: false,
                page_size: PageSize::Section1M,
            });
        }
        debug!("mmu: saved {} tlb entries", self.saved_tlb.len());
    }

    /// Re-pushes the saved TLB entries in order and re-enables the MMU and
    /// table walk, matching the pre-suspend state byte-for-byte.
    pub fn restore_context(&mut self, regs: &MmuRegs) {
        regs.restore_words(&self.saved_regs);
        for (i, entry) in self.saved_tlb.iter().enumerate() {
            regs.set_victim(i as u32);
            let cam = (entry.da & !0xFFF) | 0b100;
            let ram = entry.pa & !0xFFF;
            regs.load_tlb_entry(cam, ram);
        }
        regs.enable();
        self.enabled = true;
        debug!("mmu: restored {} tlb entries", self.saved_tlb.len());
    }

    /// Physical address of the L1 table, for programming into the register
    /// block's table-walk base.
    pub fn l1_phys(&self, l1_phys_base: u32) -> u32 {
        l1_phys_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MmuContext {
        MmuContext::new(64, 0x9000_0000)
    }

    #[test]
    fn s1_map_translate_unmap_1mib() {
        let mut mmu = ctx();
        mmu.map(0x8000_0000, 0x6000_0000, 0x0010_0000, MapAttrs::default())
            .unwrap();
        assert_eq!(mmu.translate(0x6008_1234).unwrap(), 0x8008_1234);
        mmu.unmap(0x6000_0000, 0x0010_0000).unwrap();
        assert!(matches!(
            mmu.translate(0x6008_1234).unwrap_err().kind(),
            ErrorKind::NotMapped
        ));
    }

    #[test]
    fn s2_mixed_page_sizes() {
        let mut mmu = ctx();
        mmu.map(0x8000_0000, 0x6000_0000, 0x0110_0000, MapAttrs::default())
            .unwrap();
        assert_eq!(mmu.translate(0x6010_0000).unwrap(), 0x8010_0000);
        assert_eq!(mmu.translate(0x60FF_F000).unwrap(), 0x80FF_F000);
    }

    #[test]
    fn zero_size_rejected() {
        let mut mmu = ctx();
        let err = mmu
            .map(0x8000_0000, 0x6000_0000, 0, MapAttrs::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[test]
    fn unaligned_size_rejected() {
        let mut mmu = ctx();
        let err = mmu
            .map(0x8000_0000, 0x6000_0000, 1, MapAttrs::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAlign);
    }

    #[test]
    fn overlapping_map_rolls_back_ptes_for_rejected_range() {
        let mut mmu = ctx();
        mmu.map(0x8000_0000, 0x6000_0000, 0x0010_0000, MapAttrs::default())
            .unwrap();

        // Overlaps the tail of the first mapping and extends 64 KiB past
        // it; the whole call must be rejected, and the address table and
        // page tables must agree that nothing beyond the first mapping is
        // live.
        let err = mmu
            .map(0x8100_0000, 0x6008_0000, 0x0010_0000, MapAttrs::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overlap);

        assert!(matches!(
            mmu.translate(0x6012_0000).unwrap_err().kind(),
            ErrorKind::NotMapped
        ));
        assert_eq!(mmu.translate(0x6008_1234).unwrap(), 0x8008_1234);
    }

    #[test]
    fn l2_pool_exhaustion_reports_table_full() {
        let mut mmu = MmuContext::new(1, 0x9000_0000);
        mmu.map(0x8000_0000, 0x6000_0000, 0x1000, MapAttrs::default())
            .unwrap();
        // A second, non-adjacent small mapping needs a different L1 slot's
        // L2 page; with only one L2 page preallocated this must fail.
        let err = mmu
            .map(0x8100_0000, 0x6100_0000, 0x1000, MapAttrs::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TableFull);
    }
}
