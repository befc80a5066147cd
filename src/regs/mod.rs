// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Typed views over the memory-mapped register blocks this crate drives
//! directly: PRCM (power/clock), mailbox, GPT (watchdog timer), and the
//! slave L2 MMU. Each block is a `#[repr(C)]` struct of `tock-registers`
//! fields reached only through a [`crate::hal::PhysMemory`]-provided window —
//! never a hardcoded address, since the real address windows are
//! platform/carveout dependent.

pub mod bootcfg;
pub mod gpt;
pub mod mailbox;
pub mod mmu;
pub mod prcm;

use core::ops::Deref;
use core::ptr::NonNull;

/// Wraps a raw MMIO pointer so that `Deref` gives `&Block` register access,
/// matching the `MMIODerefWrapper` pattern used by MMIO-mapped register
/// blocks elsewhere in the ecosystem.
pub struct MmioBlock<T> {
    ptr: NonNull<T>,
}

// SAFETY: the register block only exposes volatile MMIO accessors, which
// are safe to call from any thread; callers serialize actual hardware
// semantics (e.g. the module mutex) at a higher layer.
unsafe impl<T> Send for MmioBlock<T> {}
// SAFETY: see `Send` above.
unsafe impl<T> Sync for MmioBlock<T> {}

impl<T> MmioBlock<T> {
    /// Wraps a pointer to a register block.
    ///
    /// # Safety
    /// `ptr` must point to a valid, correctly-sized MMIO window for `T` for
    /// as long as the returned `MmioBlock` is alive.
    pub const unsafe fn new(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }
}

impl<T> Deref for MmioBlock<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: construction requires `ptr` to validly point to `T` for
        // the lifetime of this wrapper.
        unsafe { self.ptr.as_ref() }
    }
}
