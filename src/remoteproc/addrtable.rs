// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Per-remote address translation table.
//!
//! Entries are either **static** (inserted at attach from the resource
//! table, `ref_count` stays 0, never removed) or **dynamic** (added by
//! [`crate::mmu::MmuContext::map`], removed when their `ref_count` drops to
//! 0). Within the dynamic region, at most one mapped entry may overlap any
//! given `slave_virt` range.

use crate::error::{Error, ErrorKind, Result};
use bitflags::bitflags;

bitflags! {
    /// Which address fields of an [`AddrMapping`] are valid.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapMask: u8 {
        const MASTER_KNL_VIRT = 1 << 0;
        const MASTER_USR_VIRT = 1 << 1;
        const MASTER_PHYS     = 1 << 2;
        const SLAVE_VIRT      = 1 << 3;
        const SLAVE_PHYS      = 1 << 4;
    }
}

/// Sentinel value for an absent optional address field.
pub const ADDR_NONE: u32 = u32::MAX;

/// An entry in the per-remote address translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrMapping {
    pub master_knl_virt: u32,
    pub master_usr_virt: u32,
    pub master_phys: u32,
    pub slave_virt: u32,
    pub slave_phys: u32,
    pub size: u32,
    pub is_cached: bool,
    pub is_mapped: bool,
    pub map_mask: MapMask,
    pub ref_count: u32,
}

impl AddrMapping {
    /// Creates a static entry (never removed, no reference counting) for
    /// the given physical/slave-virtual span.
    pub fn static_entry(master_phys: u32, slave_virt: u32, size: u32, is_cached: bool) -> Self {
        Self {
            master_knl_virt: ADDR_NONE,
            master_usr_virt: ADDR_NONE,
            master_phys,
            slave_virt,
            slave_phys: ADDR_NONE,
            size,
            is_cached,
            is_mapped: false,
            map_mask: MapMask::MASTER_PHYS | MapMask::SLAVE_VIRT,
            ref_count: 0,
        }
    }

    /// Creates a dynamic entry representing a live `map()` call.
    pub fn dynamic_entry(master_phys: u32, slave_virt: u32, size: u32) -> Self {
        Self {
            master_knl_virt: ADDR_NONE,
            master_usr_virt: ADDR_NONE,
            master_phys,
            slave_virt,
            slave_phys: ADDR_NONE,
            size,
            is_cached: false,
            is_mapped: true,
            map_mask: MapMask::MASTER_PHYS | MapMask::SLAVE_VIRT,
            ref_count: 1,
        }
    }

    fn range(&self) -> (u64, u64) {
        let start = self.slave_virt as u64;
        (start, start + self.size as u64)
    }

    fn overlaps(&self, slave_virt: u32, size: u32) -> bool {
        let (a0, a1) = self.range();
        let b0 = slave_virt as u64;
        let b1 = b0 + size as u64;
        a0 < b1 && b0 < a1
    }
}

/// The per-remote address table: a static region (populated at attach) and
/// a dynamic region (populated by `map`/`unmap`).
#[derive(Debug, Default)]
pub struct AddrTable {
    entries: Vec<AddrMapping>,
}

impl AddrTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts a static entry. Fails with [`ErrorKind::TableFull`] only if
    /// an implementation-defined capacity were enforced; this crate keeps
    /// the table unbounded in host memory, matching a `std` implementation
    /// of a table that was array-bounded on the embedded original.
    pub fn insert_static(&mut self, mapping: AddrMapping) -> Result<()> {
        debug_assert!(!mapping.is_mapped);
        debug_assert_eq!(mapping.ref_count, 0);
        self.entries.push(mapping);
        Ok(())
    }

    /// Inserts a dynamic, mapped entry for `[slave_virt, slave_virt+size)`,
    /// mapped to `master_phys`. Fails with [`ErrorKind::Overlap`] if any
    /// live mapped entry already covers part of the range.
    pub fn insert_dynamic(
        &mut self,
        master_phys: u32,
        slave_virt: u32,
        size: u32,
    ) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|e| e.is_mapped && e.overlaps(slave_virt, size))
        {
            return Err(Error::new(ErrorKind::Overlap));
        }
        self.entries
            .push(AddrMapping::dynamic_entry(master_phys, slave_virt, size));
        Ok(())
    }

    /// Looks up the mapping (if any) covering `slave_virt`, returning the
    /// corresponding master physical address.
    pub fn translate(&self, slave_virt: u32) -> Option<u32> {
        self.entries.iter().find_map(|e| {
            if e.is_mapped && e.overlaps(slave_virt, 1) {
                Some(e.master_phys + (slave_virt - e.slave_virt))
            } else {
                None
            }
        })
    }

    /// Decrements the ref count of every dynamic entry overlapping
    /// `[slave_virt, slave_virt+size)`; entries whose count reaches 0 are
    /// removed. Returns `Ok(())` if at least one entry overlapped exactly
    /// the requested range, or `PartialRange`/`NotMapped` otherwise.
    pub fn unmap(&mut self, slave_virt: u32, size: u32) -> Result<()> {
        let mut touched = 0usize;
        let mut fully_covered = 0u64;
        let (target_start, target_end) = (slave_virt as u64, slave_virt as u64 + size as u64);

        for entry in &mut self.entries {
            if entry.is_mapped && entry.overlaps(slave_virt, size) {
                touched += 1;
                let (s, e) = entry.range();
                fully_covered += e.min(target_end).saturating_sub(s.max(target_start));
                entry.ref_count = entry.ref_count.saturating_sub(1);
            }
        }

        if touched == 0 {
            return Err(Error::new(ErrorKind::NotMapped));
        }
        if fully_covered < (target_end - target_start) {
            return Err(Error::new(ErrorKind::PartialRange));
        }

        self.entries
            .retain(|e| !(e.is_mapped && e.ref_count == 0 && e.overlaps(slave_virt, size)));
        Ok(())
    }

    /// Removes all dynamic entries, keeping static ones, per the detach
    /// sequence (§4.4).
    pub fn clear_dynamic(&mut self) {
        self.entries.retain(|e| !e.is_mapped);
    }

    /// Returns an iterator over all entries (static and dynamic).
    pub fn iter(&self) -> impl Iterator<Item = &AddrMapping> {
        self.entries.iter()
    }
}
