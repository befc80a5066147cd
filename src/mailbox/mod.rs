// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Mailbox-based interrupt transport (C3): translates the hardware mailbox
//! FIFOs into per-remote-endpoint message delivery, with context
//! save/restore across low-power transitions.
//!
//! The single shared ISR is a two-pass routine (§4.2): a hardware-level
//! "check and clear" pass drains every pending FIFO word into a lock-free
//! [`isr::CellPool`]-backed per-remote queue, then a soft-level pass drains
//! each queue and invokes its registered callback.

pub mod isr;

use crate::error::{Error, ErrorKind, Result};
use crate::hal::{HalOps, InterruptToken, ProcId};
use crate::regs::mailbox::{self, RegisterBlock as MailboxRegs};
use crate::regs::MmioBlock;
use isr::{CellPool, MessageCell};
use log::{debug, error, warn};
use spin::mutex::SpinMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Per-remote-queue depth; a small multiple of the FIFO depth is enough to
/// absorb a burst before the soft-level pass runs.
const QUEUE_CAPACITY: usize = 64;
/// Total message-cell pool size, shared across all remotes.
const CELL_POOL_SIZE: usize = 256;

type Callback = Box<dyn Fn(u32) + Send + Sync>;

struct RemoteMailbox {
    proc_id: ProcId,
    regs: MmioBlock<MailboxRegs>,
    rx_fifo: u32,
    tx_fifo: u32,
    user: u32,
    refcount: u32,
    queue: SpinMutex<VecDeque<MessageCell>>,
    callback: SpinMutex<Option<Callback>>,
    saved_irqenable: SpinMutex<u32>,
}

/// Owns the shared mailbox ISR registration and the per-remote FIFO state
/// for every attached remote.
pub struct MailboxSubsystem {
    hal: Arc<dyn HalOps>,
    int_id: u32,
    isr_refcount: AtomicU32,
    isr_token: SpinMutex<Option<InterruptToken>>,
    cells: CellPool<CELL_POOL_SIZE>,
    remotes: SpinMutex<Vec<RemoteMailbox>>,
}

/// Selects which FIFO indices and "user id" a remote uses, per §6's
/// bit-exact mailbox assignment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Dsp,
    Ipu,
}

impl RemoteKind {
    fn rx_fifo(self) -> u32 {
        match self {
            RemoteKind::Dsp => mailbox::FIFO_DSP_TO_HOST,
            RemoteKind::Ipu => mailbox::FIFO_IPU_TO_HOST,
        }
    }

    fn tx_fifo(self) -> u32 {
        match self {
            RemoteKind::Dsp => mailbox::FIFO_HOST_TO_DSP,
            RemoteKind::Ipu => mailbox::FIFO_HOST_TO_IPU,
        }
    }
}

impl MailboxSubsystem {
    /// Creates a new subsystem bound to the given host-side interrupt
    /// number; no remote is registered yet.
    pub fn new(hal: Arc<dyn HalOps>, int_id: u32) -> Self {
        Self {
            hal,
            int_id,
            isr_refcount: AtomicU32::new(0),
            isr_token: SpinMutex::new(None),
            cells: CellPool::new(),
            remotes: SpinMutex::new(Vec::new()),
        }
    }

    fn find_index(remotes: &[RemoteMailbox], proc_id: ProcId) -> Option<usize> {
        remotes.iter().position(|r| r.proc_id == proc_id)
    }

    /// Installs the shared ISR on first use (refcounted), registers
    /// `callback` for `proc_id`'s FIFO traffic, clears any stale FIFO
    /// contents, and enables the remote's mailbox IRQ.
    ///
    /// A second `register` for an already-registered `proc_id` is benign:
    /// it bumps that remote's own refcount and returns `Ok`, requiring a
    /// matching number of [`MailboxSubsystem::unregister`] calls before the
    /// remote's FIFO/IRQ state is actually torn down. Fails with
    /// [`ErrorKind::Busy`] if the shared ISR slot is full
    /// ([`crate::config::ModuleConfig::MAX_PROCS`] remotes already tracked).
    pub fn register(
        &self,
        proc_id: ProcId,
        kind: RemoteKind,
        regs: MmioBlock<MailboxRegs>,
        callback: Callback,
    ) -> Result<()> {
        {
            let mut remotes = self.remotes.lock();
            if let Some(idx) = Self::find_index(&remotes, proc_id) {
                remotes[idx].refcount += 1;
                return Ok(());
            }
            if remotes.len() >= crate::config::ModuleConfig::MAX_PROCS {
                return Err(Error::new(ErrorKind::Busy));
            }
        }

        let prior = self.isr_refcount.fetch_add(1, Ordering::AcqRel);
        if prior == 0 {
            let handler_subsystem = self as *const Self as usize;
            // SAFETY: `self` outlives the registered handler because the
            // handler is unregistered (in `Drop`/`unregister`) before the
            // subsystem itself is torn down.
            let token = self.hal.register_interrupt(
                self.int_id,
                Box::new(move || {
                    let subsystem = unsafe { &*(handler_subsystem as *const Self) };
                    subsystem.dispatch_interrupt();
                }),
            )?;
            *self.isr_token.lock() = Some(token);
            debug!("mailbox: installed shared ISR for int_id={}", self.int_id);
        }

        let rx_fifo = kind.rx_fifo();
        let tx_fifo = kind.tx_fifo();
        let user = match kind {
            RemoteKind::Dsp => mailbox::MBOX_USER_DSP,
            RemoteKind::Ipu => mailbox::MBOX_USER_IPU,
        };

        // Drain any stale FIFO contents before enabling the IRQ.
        while regs.num_messages(rx_fifo) > 0 {
            let _ = regs.read_message(rx_fifo);
        }
        regs.clear_irq_status(user, u32::MAX);
        regs.set_irq_enable(user, regs.irq_enable(user) | (1 << rx_fifo));

        self.remotes.lock().push(RemoteMailbox {
            proc_id,
            regs,
            rx_fifo,
            tx_fifo,
            user,
            refcount: 1,
            queue: SpinMutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            callback: SpinMutex::new(Some(callback)),
            saved_irqenable: SpinMutex::new(0),
        });
        Ok(())
    }

    /// Reverses [`MailboxSubsystem::register`]; uninstalls the shared ISR
    /// on the last user. A no-op beyond decrementing the refcount until the
    /// matching number of prior `register` calls have each been undone.
    pub fn unregister(&self, proc_id: ProcId) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let idx = Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        remotes[idx].refcount -= 1;
        if remotes[idx].refcount > 0 {
            return Ok(());
        }
        let remote = remotes.remove(idx);
        drop(remotes);

        remote.regs.set_irq_enable(remote.user, 0);
        while remote.regs.num_messages(remote.rx_fifo) > 0 {
            let _ = remote.regs.read_message(remote.rx_fifo);
        }

        if self.isr_refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(token) = self.isr_token.lock().take() {
                self.hal.unregister_interrupt(token);
            }
            debug!("mailbox: uninstalled shared ISR for int_id={}", self.int_id);
        }
        Ok(())
    }

    /// Sets the IRQENABLE bit for `proc_id`'s outgoing mailbox.
    pub fn enable(&self, proc_id: ProcId) -> Result<()> {
        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];
        remote
            .regs
            .set_irq_enable(remote.user, remote.regs.irq_enable(remote.user) | (1 << remote.rx_fifo));
        Ok(())
    }

    /// Clears the IRQENABLE bit for `proc_id`'s outgoing mailbox.
    pub fn disable(&self, proc_id: ProcId) -> Result<()> {
        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];
        remote
            .regs
            .set_irq_enable(remote.user, remote.regs.irq_enable(remote.user) & !(1 << remote.rx_fifo));
        Ok(())
    }

    /// Polls the FIFO status until it has room (bounded), then writes
    /// `value`. Never blocks indefinitely; drops with a warning on
    /// saturation.
    pub fn send(&self, proc_id: ProcId, value: u32) -> Result<()> {
        const MAX_POLLS: u32 = 100;
        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];

        for _ in 0..MAX_POLLS {
            if !remote.regs.fifo_full(remote.tx_fifo) {
                remote.regs.write_message(remote.tx_fifo, value);
                return Ok(());
            }
        }
        warn!("mailbox: tx fifo full for proc {proc_id}, dropping message");
        Err(Error::new(ErrorKind::IoError))
    }

    /// Whether `proc_id`'s rx FIFO currently holds an unread word, used by
    /// the hibernation coordinator's pending-message gate (§4.6).
    pub fn has_pending(&self, proc_id: ProcId) -> Result<bool> {
        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];
        Ok(remote.regs.num_messages(remote.rx_fifo) > 0)
    }

    /// Reads one FIFO word from `proc_id`'s rx FIFO and clears the IRQ
    /// status, without going through the queued dispatch path.
    pub fn clear(&self, proc_id: ProcId) -> Result<u32> {
        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];
        let value = remote.regs.read_message(remote.rx_fifo);
        remote.regs.clear_irq_status(remote.user, 1 << remote.rx_fifo);
        Ok(value)
    }

    /// Snapshots the IRQENABLE bits for `proc_id` across a power
    /// transition.
    pub fn save_context(&self, proc_id: ProcId) -> Result<()> {
        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];
        *remote.saved_irqenable.lock() = remote.regs.irq_enable(remote.user);
        Ok(())
    }

    /// Restores the IRQENABLE bits saved by
    /// [`MailboxSubsystem::save_context`] and sets the unit back to
    /// smart-idle mode.
    pub fn restore_context(&self, proc_id: ProcId) -> Result<()> {
        use crate::regs::mailbox::SYSCONFIG;
        use tock_registers::interfaces::Writeable;

        let remotes = self.remotes.lock();
        let remote = &remotes[Self::find_index(&remotes, proc_id).ok_or(Error::new(ErrorKind::NotFound))?];
        let saved = *remote.saved_irqenable.lock();
        remote.regs.set_irq_enable(remote.user, saved);
        remote.regs.SYSCONFIG.write(SYSCONFIG::SMARTIDLE::Smart);
        Ok(())
    }

    /// The shared ISR entry point: check-and-clear pass followed by the
    /// soft-level dispatch pass. Idempotent under spurious firing: if no
    /// FIFO word is pending anywhere, nothing is cleared and no callback
    /// runs.
    pub fn dispatch_interrupt(&self) {
        let mut to_drain: Vec<usize> = Vec::new();

        {
            let remotes = self.remotes.lock();
            for (i, remote) in remotes.iter().enumerate() {
                let mut pending = false;
                while remote.regs.num_messages(remote.rx_fifo) > 0 {
                    let value = remote.regs.read_message(remote.rx_fifo);
                    if let Some(cell_idx) = self.cells.alloc() {
                        self.cells.write(
                            cell_idx,
                            MessageCell {
                                proc_id: remote.proc_id,
                                value,
                            },
                        );
                        let cell = self.cells.read(cell_idx);
                        remote.queue.lock().push_back(cell);
                        self.cells.free(cell_idx);
                    } else {
                        error!("mailbox: cell pool exhausted, dropping message");
                    }
                    pending = true;
                }
                if pending {
                    remote.regs.clear_irq_status(remote.user, 1 << remote.rx_fifo);
                    to_drain.push(i);
                }
            }
        }

        for i in to_drain {
            self.drain_remote(i);
        }
    }

    fn drain_remote(&self, index: usize) {
        loop {
            let cell = {
                let remotes = self.remotes.lock();
                let Some(remote) = remotes.get(index) else {
                    return;
                };
                remote.queue.lock().pop_front()
            };
            let Some(cell) = cell else {
                return;
            };

            let remotes = self.remotes.lock();
            let Some(remote) = remotes.get(index) else {
                return;
            };
            let callback = remote.callback.lock();
            if let Some(cb) = callback.as_ref() {
                cb(cell.value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;
    use crate::fakes::FakeHalOps;
    use core::ptr::NonNull;

    #[test]
    fn remote_kind_fifo_assignment_matches_spec() {
        assert_eq!(RemoteKind::Dsp.rx_fifo(), mailbox::FIFO_DSP_TO_HOST);
        assert_eq!(RemoteKind::Dsp.tx_fifo(), mailbox::FIFO_HOST_TO_DSP);
        assert_eq!(RemoteKind::Ipu.rx_fifo(), mailbox::FIFO_IPU_TO_HOST);
        assert_eq!(RemoteKind::Ipu.tx_fifo(), mailbox::FIFO_HOST_TO_IPU);
    }

    fn fake_mailbox_regs() -> MmioBlock<MailboxRegs> {
        // SAFETY: a freshly zeroed, leaked register block is never read by
        // anything but this test's own FIFO/IRQ bit-twiddling, for as long
        // as the test runs.
        let boxed: Box<MailboxRegs> = Box::new(unsafe { core::mem::zeroed() });
        let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
        unsafe { MmioBlock::new(ptr) }
    }

    #[test]
    fn register_same_proc_twice_bumps_refcount_instead_of_failing() {
        let hal: Arc<dyn HalOps> = Arc::new(FakeHalOps::new());
        let subsystem = MailboxSubsystem::new(hal, 7);

        subsystem.register(0, RemoteKind::Dsp, fake_mailbox_regs(), Box::new(|_| {})).unwrap();
        subsystem.register(0, RemoteKind::Dsp, fake_mailbox_regs(), Box::new(|_| {})).unwrap();

        // First `unregister` only undoes one of the two `register` calls;
        // the remote's state must still be present afterward.
        subsystem.unregister(0).unwrap();
        subsystem.enable(0).unwrap();

        subsystem.unregister(0).unwrap();
        assert_eq!(subsystem.enable(0).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn register_beyond_max_procs_reports_busy() {
        let hal: Arc<dyn HalOps> = Arc::new(FakeHalOps::new());
        let subsystem = MailboxSubsystem::new(hal, 7);

        for proc_id in 0..ModuleConfig::MAX_PROCS as u32 {
            subsystem.register(proc_id, RemoteKind::Dsp, fake_mailbox_regs(), Box::new(|_| {})).unwrap();
        }

        let err = subsystem
            .register(ModuleConfig::MAX_PROCS as u32, RemoteKind::Dsp, fake_mailbox_regs(), Box::new(|_| {}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
    }
}
