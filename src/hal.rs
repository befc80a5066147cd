// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! External capability traits.
//!
//! Per §1, the host OS's locking, timer, and memory-mapping primitives, the
//! firmware/resource-table loader, the device-tree/config reader, and the
//! system's power manager are all out of scope for this crate and are
//! instead reached through this small set of collaborator traits. Nothing
//! in this module ships a default implementation beyond what [`crate::fakes`]
//! provides for tests.

use crate::error::Result;
use crate::remoteproc::AddrMapping;
use core::ptr::NonNull;
use core::time::Duration;

/// Identifies a remote core.
pub type ProcId = u32;

/// Maps a physical carveout into process-visible memory.
///
/// This is the "memory mapping" capability that backs page-table pool
/// memory, VirtQueue ring memory, and register-block MMIO windows.
pub trait PhysMemory: Send + Sync {
    /// Maps `size` bytes starting at `phys_addr` and returns a pointer to
    /// the mapped window.
    ///
    /// # Safety
    /// The caller must ensure `phys_addr`/`size` describe memory that is
    /// safe to map for the lifetime of the returned mapping, and must call
    /// [`PhysMemory::unmap`] with the same arguments before that memory
    /// becomes unavailable.
    unsafe fn map(&self, phys_addr: u64, size: usize) -> Result<NonNull<u8>>;

    /// Unmaps a window previously returned by [`PhysMemory::map`].
    ///
    /// # Safety
    /// `ptr`/`size` must be the exact values returned by (or passed to) a
    /// prior matching `map` call, and no outstanding references to the
    /// mapped memory may remain.
    unsafe fn unmap(&self, ptr: NonNull<u8>, size: usize);
}

/// Per-remote register access and interrupt registration.
///
/// A [`crate::remoteproc::RemoteCoreOps`] implementation is handed one of these,
/// selected per [`ProcId`], to reach the MMIO register blocks (C1) and to
/// install the mailbox ISR (the interrupt-registration half of C3).
pub trait HalOps: Send + Sync {
    /// Registers `handler` to be invoked when `int_id` fires, returning an
    /// opaque token that can be passed to [`HalOps::unregister_interrupt`].
    fn register_interrupt(
        &self,
        int_id: u32,
        handler: Box<dyn Fn() + Send + Sync>,
    ) -> Result<InterruptToken>;

    /// Removes a previously registered interrupt handler.
    fn unregister_interrupt(&self, token: InterruptToken);

    /// Enables delivery of the interrupt identified by `token`.
    fn enable_interrupt(&self, token: InterruptToken);

    /// Disables delivery of the interrupt identified by `token`.
    fn disable_interrupt(&self, token: InterruptToken);
}

/// An opaque handle to a registered interrupt, returned by
/// [`HalOps::register_interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterruptToken(pub u32);

/// Schedules one-shot or repeating timer callbacks.
///
/// Backs the hibernation-idle timer (C7) and bounded hardware-status polls
/// that would otherwise spin the calling thread.
pub trait OsTimer: Send + Sync {
    /// Schedules `callback` to run once after `delay`, returning a token
    /// usable with [`OsTimer::cancel`].
    fn schedule_once(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerToken;

    /// Schedules `callback` to run repeatedly every `period`, returning a
    /// token usable with [`OsTimer::cancel`].
    fn schedule_repeating(&self, period: Duration, callback: Box<dyn Fn() + Send>) -> TimerToken;

    /// Cancels a previously scheduled callback. A no-op if it already fired
    /// (for one-shot timers) or was already canceled.
    fn cancel(&self, token: TimerToken);

    /// Blocks the calling thread for a short, bounded duration. Used only
    /// by bounded hardware-status polls (never for unbounded waits).
    fn sleep(&self, duration: Duration);
}

/// An opaque handle to a scheduled timer callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// Parses a firmware image's resource table for one remote.
///
/// Per §4.4 step 1: external; this crate consumes the two returned lists.
pub trait FirmwareLoader: Send + Sync {
    /// Returns the address mappings found in the given remote's resource
    /// table, and the slave-side address of its suspend flag, if any.
    fn parse(&self, proc_id: ProcId) -> Result<(Vec<AddrMapping>, Option<u32>)>;
}

/// Named key -> value lookup, typically backed by a device tree or config
/// file.
pub trait ConfigSource: Send + Sync {
    /// Looks up `key`, returning `None` if absent.
    fn get(&self, key: &str) -> Option<String>;
}

/// Forwards OPP/DVFS requests to the system's power manager.
///
/// Per §4.5: this component keeps no CPU-frequency state of its own.
pub trait PowerManagerClient: Send + Sync {
    /// Requests that `domain` be set to operating point `opp`.
    fn request_opp(&self, domain: &str, opp: u32) -> Result<()>;
}
