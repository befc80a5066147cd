// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! In-memory fakes for the external capability traits of [`crate::hal`].
//!
//! These let the state machine, MMU engine, and mailbox transport be
//! exercised without real MMIO, mirroring how the teacher tests PSCI
//! against `arm-sysregs::fake::SYSREGS` and a fake SPM rather than real
//! hardware. Used by this crate's own unit tests and by the
//! `tests/scenarios.rs` integration suite; not meant for production use.

use crate::error::Result;
use crate::hal::{HalOps, InterruptToken, OsTimer, PhysMemory, ProcId, TimerToken};
use crate::remoteproc::AddrMapping;
use core::ptr::NonNull;
use core::time::Duration;
use spin::mutex::SpinMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A fake [`PhysMemory`] backed by a plain `HashMap` keyed on physical
/// address, so writes from one handle are visible to reads through
/// another handle mapping the same address — enough to simulate a shared
/// carveout between a host-side and remote-side view in loopback tests.
pub struct FakePhysMemory {
    arena: SpinMutex<HashMap<u64, Box<[u8]>>>,
}

impl FakePhysMemory {
    /// Creates an empty fake memory arena.
    pub fn new() -> Self {
        Self {
            arena: SpinMutex::new(HashMap::new()),
        }
    }
}

impl Default for FakePhysMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysMemory for FakePhysMemory {
    unsafe fn map(&self, phys_addr: u64, size: usize) -> Result<NonNull<u8>> {
        let mut arena = self.arena.lock();
        let buf = arena
            .entry(phys_addr)
            .or_insert_with(|| vec![0u8; size].into_boxed_slice());
        if buf.len() < size {
            *buf = vec![0u8; size].into_boxed_slice();
        }
        Ok(NonNull::new(buf.as_mut_ptr()).expect("boxed slice is never null"))
    }

    unsafe fn unmap(&self, _ptr: NonNull<u8>, _size: usize) {}
}

struct RegisteredInterrupt {
    int_id: u32,
    handler: Box<dyn Fn() + Send + Sync>,
    enabled: bool,
}

/// A fake [`HalOps`] whose `fire` method lets a test manually invoke a
/// registered interrupt handler, standing in for the real OS's interrupt
/// controller trampoline.
pub struct FakeHalOps {
    next_token: AtomicU32,
    interrupts: SpinMutex<HashMap<u32, RegisteredInterrupt>>,
}

impl FakeHalOps {
    /// Creates a fake with no interrupts registered.
    pub fn new() -> Self {
        Self {
            next_token: AtomicU32::new(1),
            interrupts: SpinMutex::new(HashMap::new()),
        }
    }

    /// Invokes the handler registered for `int_id`, if any and if enabled.
    /// Standing in for the real interrupt controller delivering the line.
    pub fn fire(&self, int_id: u32) {
        let interrupts = self.interrupts.lock();
        for registered in interrupts.values() {
            if registered.int_id == int_id && registered.enabled {
                (registered.handler)();
            }
        }
    }
}

impl Default for FakeHalOps {
    fn default() -> Self {
        Self::new()
    }
}

impl HalOps for FakeHalOps {
    fn register_interrupt(
        &self,
        int_id: u32,
        handler: Box<dyn Fn() + Send + Sync>,
    ) -> Result<InterruptToken> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.interrupts.lock().insert(
            token,
            RegisteredInterrupt {
                int_id,
                handler,
                enabled: true,
            },
        );
        Ok(InterruptToken(token))
    }

    fn unregister_interrupt(&self, token: InterruptToken) {
        self.interrupts.lock().remove(&token.0);
    }

    fn enable_interrupt(&self, token: InterruptToken) {
        if let Some(entry) = self.interrupts.lock().get_mut(&token.0) {
            entry.enabled = true;
        }
    }

    fn disable_interrupt(&self, token: InterruptToken) {
        if let Some(entry) = self.interrupts.lock().get_mut(&token.0) {
            entry.enabled = false;
        }
    }
}

struct ScheduledCallback {
    repeating: bool,
    callback: Arc<dyn Fn() + Send + Sync>,
}

/// A fake [`OsTimer`] that never actually waits: [`FakeOsTimer::fire_all`]
/// lets a test deterministically simulate every scheduled callback's timer
/// elapsing, instead of racing real wall-clock time.
pub struct FakeOsTimer {
    next_token: AtomicU64,
    scheduled: SpinMutex<HashMap<u64, ScheduledCallback>>,
}

impl FakeOsTimer {
    /// Creates a fake with nothing scheduled.
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            scheduled: SpinMutex::new(HashMap::new()),
        }
    }

    /// Invokes every currently scheduled callback once, removing one-shot
    /// entries afterward.
    pub fn fire_all(&self) {
        let callbacks: Vec<(u64, Arc<dyn Fn() + Send + Sync>, bool)> = self
            .scheduled
            .lock()
            .iter()
            .map(|(token, entry)| (*token, entry.callback.clone(), entry.repeating))
            .collect();
        for (token, callback, repeating) in callbacks {
            callback();
            if !repeating {
                self.scheduled.lock().remove(&token);
            }
        }
    }
}

impl Default for FakeOsTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl OsTimer for FakeOsTimer {
    fn schedule_once(&self, _delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let cell = SpinMutex::new(Some(callback));
        self.scheduled.lock().insert(
            token,
            ScheduledCallback {
                repeating: false,
                callback: Arc::new(move || {
                    if let Some(f) = cell.lock().take() {
                        f();
                    }
                }),
            },
        );
        TimerToken(token)
    }

    fn schedule_repeating(&self, _period: Duration, callback: Box<dyn Fn() + Send>) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.scheduled.lock().insert(
            token,
            ScheduledCallback {
                repeating: true,
                callback: Arc::from(callback),
            },
        );
        TimerToken(token)
    }

    fn cancel(&self, token: TimerToken) {
        self.scheduled.lock().remove(&token.0);
    }

    fn sleep(&self, _duration: Duration) {}
}

/// A fake [`crate::hal::FirmwareLoader`] returning a fixed, test-configured
/// mapping list.
pub struct FakeFirmwareLoader {
    mappings: HashMap<ProcId, (Vec<AddrMapping>, Option<u32>)>,
}

impl FakeFirmwareLoader {
    /// Creates a loader with no remotes configured.
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    /// Configures the resource-table-derived mapping list and suspend-flag
    /// address returned for `proc_id`.
    pub fn set(&mut self, proc_id: ProcId, mappings: Vec<AddrMapping>, suspend_flag: Option<u32>) {
        self.mappings.insert(proc_id, (mappings, suspend_flag));
    }
}

impl Default for FakeFirmwareLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::hal::FirmwareLoader for FakeFirmwareLoader {
    fn parse(&self, proc_id: ProcId) -> Result<(Vec<AddrMapping>, Option<u32>)> {
        Ok(self.mappings.get(&proc_id).cloned().unwrap_or_default())
    }
}

/// A fake [`crate::hal::ConfigSource`] backed by a plain map.
pub struct FakeConfigSource {
    values: HashMap<String, String>,
}

impl FakeConfigSource {
    /// Creates a config source with the given key/value pairs.
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl crate::hal::ConfigSource for FakeConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// A fake [`crate::hal::PowerManagerClient`] recording the last OPP request
/// it received.
pub struct FakePowerManagerClient {
    last: SpinMutex<Option<(String, u32)>>,
}

impl FakePowerManagerClient {
    /// Creates a fake with no prior requests recorded.
    pub fn new() -> Self {
        Self {
            last: SpinMutex::new(None),
        }
    }

    /// Returns the last `(domain, opp)` request received, if any.
    pub fn last_request(&self) -> Option<(String, u32)> {
        self.last.lock().clone()
    }
}

impl Default for FakePowerManagerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::hal::PowerManagerClient for FakePowerManagerClient {
    fn request_opp(&self, domain: &str, opp: u32) -> Result<()> {
        *self.last.lock() = Some((domain.to_owned(), opp));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_hal_ops_fires_registered_handler() {
        let hal = FakeHalOps::new();
        let count = Arc::new(AtomicU32::new(0));
        let counted = count.clone();
        let token = hal
            .register_interrupt(7, Box::new(move || { counted.fetch_add(1, Ordering::SeqCst); }))
            .unwrap();
        hal.fire(7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        hal.disable_interrupt(token);
        hal.fire(7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fake_os_timer_fire_all_invokes_repeating() {
        let timer = FakeOsTimer::new();
        let count = Arc::new(AtomicU32::new(0));
        let counted = count.clone();
        timer.schedule_repeating(
            Duration::from_millis(1),
            Box::new(move || { counted.fetch_add(1, Ordering::SeqCst); }),
        );
        timer.fire_all();
        timer.fire_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fake_phys_memory_shares_writes_across_maps() {
        let mem = FakePhysMemory::new();
        unsafe {
            let a = mem.map(0x1000, 16).unwrap();
            *a.as_ptr() = 0xAB;
            let b = mem.map(0x1000, 16).unwrap();
            assert_eq!(*b.as_ptr(), 0xAB);
        }
    }
}
