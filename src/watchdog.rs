// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Watchdog + self-hibernation (C7): one GP timer per remote core for
//! liveness detection, plus an optional idle-hibernation coordinator that
//! drives the suspend sequence (§4.4) when every co-core reports idle and
//! no mailbox traffic is pending.

use crate::error::Result;
use crate::hal::{OsTimer, ProcId, TimerToken};
use crate::regs::gpt::RegisterBlock as GptRegs;
use crate::regs::MmioBlock;
use log::{info, warn};
use num_enum::TryFromPrimitive;
use spin::mutex::SpinMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A value received on a remote's mailbox FIFO that carries out-of-band
/// meaning rather than naming a VirtQueue kick (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum MailboxCommand {
    /// The remote has become idle and is a hibernation candidate.
    RemoteIdle = 0x01,
}

/// Interprets a raw mailbox FIFO word per §6: a recognized out-of-band
/// command, or `None` meaning "treat this as a VirtQueue kick".
pub fn classify_mailbox_word(value: u32) -> Option<MailboxCommand> {
    MailboxCommand::try_from(value).ok()
}

/// A snapshot of a GP timer's register state, saved across a power
/// transition and restored byte-for-byte on resume.
#[derive(Debug, Clone, Copy, Default)]
struct GptSnapshot {
    tldr: u32,
    tcrr: u32,
    tclr_running: bool,
}

/// One GP timer dedicated to detecting an unresponsive remote core.
pub struct WatchdogTimer {
    proc_id: ProcId,
    regs: MmioBlock<GptRegs>,
    reload: u32,
    snapshot: SpinMutex<GptSnapshot>,
    fired: AtomicBool,
}

impl WatchdogTimer {
    /// Creates a watchdog bound to `proc_id`'s GPT register block, armed to
    /// overflow after `reload` ticks.
    pub fn new(proc_id: ProcId, regs: MmioBlock<GptRegs>, reload: u32) -> Self {
        Self {
            proc_id,
            regs,
            reload,
            snapshot: SpinMutex::new(GptSnapshot::default()),
            fired: AtomicBool::new(false),
        }
    }

    /// Arms the timer in smart-idle, auto-reload, overflow-triggered mode.
    pub fn start(&self) {
        self.fired.store(false, Ordering::Release);
        self.regs.start_overflow_watchdog(self.reload);
    }

    /// Stops the timer and disables its overflow interrupt.
    pub fn stop(&self) {
        self.regs.stop();
    }

    /// Call from the GPT overflow ISR: acknowledges the interrupt and marks
    /// the watchdog fired. Returns `true` exactly once per overflow.
    pub fn on_overflow(&self) -> bool {
        if !self.regs.overflow_pending() {
            return false;
        }
        self.regs.clear_overflow_irq();
        self.fired.store(true, Ordering::Release);
        warn!("watchdog: proc {} overflow, marking Watchdog state", self.proc_id);
        true
    }

    /// Whether this watchdog has fired since the last [`WatchdogTimer::start`].
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Snapshots the timer's reload/count/running state ahead of a suspend.
    pub fn save(&self) {
        let mut snapshot = self.snapshot.lock();
        snapshot.tldr = self.reload;
        snapshot.tcrr = self.reload;
        snapshot.tclr_running = !self.fired.load(Ordering::Acquire);
    }

    /// Restores the timer to the state captured by [`WatchdogTimer::save`].
    pub fn restore(&self) {
        let snapshot = *self.snapshot.lock();
        if snapshot.tclr_running {
            self.regs.start_overflow_watchdog(snapshot.tldr);
        }
    }
}

/// A remote-published "I am idle" flag read from shared memory, checked by
/// the hibernation coordinator before it commits to a suspend.
pub trait IdleFlag: Send + Sync {
    /// Returns whether the remote currently reports itself idle.
    fn is_idle(&self) -> bool;
}

/// Drives the optional self-hibernation policy (§4.6): a single repeating
/// timer that, on fire, checks every co-core's idle flag and each
/// mailbox's pending-message count before invoking a caller-supplied
/// suspend callback; if either check fails, the timer is simply left to
/// fire again next period.
pub struct HibernationCoordinator {
    timer: Arc<dyn OsTimer>,
    timeout: Duration,
    token: SpinMutex<Option<TimerToken>>,
    idle_checks: SpinMutex<Vec<Arc<dyn IdleFlag>>>,
    pending_checks: SpinMutex<Vec<Box<dyn Fn() -> bool + Send + Sync>>>,
    suspend: Box<dyn Fn() -> Result<()> + Send + Sync>,
}

impl HibernationCoordinator {
    /// Creates a coordinator that, once armed, fires `suspend` after
    /// `timeout_ms` of idleness (subject to the idle/pending checks).
    pub fn new(
        timer: Arc<dyn OsTimer>,
        timeout_ms: u32,
        suspend: Box<dyn Fn() -> Result<()> + Send + Sync>,
    ) -> Self {
        Self {
            timer,
            timeout: Duration::from_millis(timeout_ms as u64),
            token: SpinMutex::new(None),
            idle_checks: SpinMutex::new(Vec::new()),
            pending_checks: SpinMutex::new(Vec::new()),
            suspend,
        }
    }

    /// Registers an additional co-core idle flag that must read idle before
    /// hibernation proceeds.
    pub fn add_idle_flag(&self, flag: Arc<dyn IdleFlag>) {
        self.idle_checks.lock().push(flag);
    }

    /// Registers an additional "are any messages pending" check (typically
    /// one per mailbox FIFO) that must read false before hibernation
    /// proceeds.
    pub fn add_pending_check(&self, check: Box<dyn Fn() -> bool + Send + Sync>) {
        self.pending_checks.lock().push(check);
    }

    /// Returns whether every registered co-core is idle and no mailbox has
    /// a pending message.
    pub fn quiescent(&self) -> bool {
        self.idle_checks.lock().iter().all(|f| f.is_idle())
            && self.pending_checks.lock().iter().all(|c| !c())
    }

    /// Arms the repeating idle timer.
    pub fn arm(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let token = self.timer.schedule_repeating(
            self.timeout,
            Box::new(move || {
                if let Some(coordinator) = weak.upgrade() {
                    coordinator.on_timer_fire();
                }
            }),
        );
        *self.token.lock() = Some(token);
    }

    /// Disarms the repeating idle timer.
    pub fn disarm(&self) {
        if let Some(token) = self.token.lock().take() {
            self.timer.cancel(token);
        }
    }

    fn on_timer_fire(&self) {
        if !self.quiescent() {
            info!("hibernation: not quiescent, deferring to next period");
            return;
        }
        info!("hibernation: quiescent, invoking suspend sequence");
        if let Err(e) = (self.suspend)() {
            warn!("hibernation: suspend sequence failed: {e}");
        }
    }
}
