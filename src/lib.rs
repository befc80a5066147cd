// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Host-side control plane for OMAP/VAYU-class DSP and Cortex-M (IPU)
//! coprocessors: MMIO register access, the slave L2 MMU, the mailbox
//! interrupt transport, a VirtQueue/MQCopy messaging layer, power/clock
//! gating, watchdog and self-hibernation, and the remote-processor
//! lifecycle state machine that ties them together.
//!
//! Everything this crate cannot own directly — interrupt dispatch, timers,
//! physical memory mapping, the firmware/resource-table loader, device-tree
//! configuration, and the system power manager — is reached through the
//! capability traits in [`hal`]. A caller wires those to its host OS once
//! and drives every remote through the single [`Module`] singleton below.

pub mod config;
pub mod error;
#[cfg(any(test, feature = "fakes"))]
pub mod fakes;
pub mod hal;
pub mod logging;
pub mod mailbox;
pub mod mmu;
pub mod mqcopy;
pub mod power;
pub mod regs;
pub mod remoteproc;
pub mod virtqueue;
pub mod watchdog;

use config::{ModuleConfig, RemoteConfig};
use error::{Error, ErrorKind, Result};
use hal::{FirmwareLoader, HalOps, OsTimer, PhysMemory, PowerManagerClient, ProcId};
use mailbox::{MailboxSubsystem, RemoteKind};
use mmu::pte::MapAttrs;
use mqcopy::MqCopyChannel;
use power::{PowerCoordinator, PowerDomain};
use regs::gpt::RegisterBlock as GptRegs;
use regs::mailbox::RegisterBlock as MailboxRegs;
use regs::MmioBlock;
use remoteproc::{PendingMapping, ProcState, RemoteCoreOps, RemoteProcessor};
use spin::mutex::SpinMutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use watchdog::{HibernationCoordinator, IdleFlag, WatchdogTimer};

static MODULE: SpinMutex<Option<Arc<Module>>> = SpinMutex::new(None);

/// Everything [`Module::attach`] needs for one remote core: the
/// caller-selected [`RemoteCoreOps`] implementation, the register windows
/// and ring buffers it owns, and the power domain it draws from.
///
/// Plain data, same spirit as [`config::RemoteConfig`]: populated by the
/// caller, typically from whatever its [`hal::ConfigSource`] and firmware
/// image describe.
pub struct AttachParams {
    /// Per-remote boot-mode/carveout configuration.
    pub config: RemoteConfig,
    /// The hardware-specific capability set for this remote (§9's
    /// replacement for the original's per-remote "fxnTable").
    pub ops: Arc<dyn RemoteCoreOps>,
    /// Which logical power domain this remote draws from.
    pub power_domain: PowerDomain,
    /// Selects this remote's mailbox FIFO pair.
    pub mailbox_kind: RemoteKind,
    /// This remote's mailbox register block.
    pub mailbox_regs: MmioBlock<MailboxRegs>,
    /// This remote's watchdog GP timer, if liveness detection is wanted.
    pub watchdog_regs: Option<MmioBlock<GptRegs>>,
    /// Watchdog reload value, in timer ticks; ignored if `watchdog_regs` is
    /// `None`.
    pub watchdog_reload: u32,
    /// Physical-memory mapping capability backing this remote's VirtQueue
    /// ring buffers.
    pub phys: Arc<dyn PhysMemory>,
    /// Physical base address of this remote's L1 page-table (16 KiB,
    /// preallocated by the caller).
    pub l1_phys_base: u32,
    /// Physical base address of this remote's preallocated L2 coarse-page
    /// pool.
    pub l2_phys_base: u32,
    /// Physical base address of this remote's tx ring buffer pool.
    pub tx_ring_base: u32,
    /// Physical base address of this remote's rx ring buffer pool.
    pub rx_ring_base: u32,
}

struct RemoteEntry {
    processor: RemoteProcessor,
    channel: Arc<MqCopyChannel>,
    watchdog: Option<Arc<WatchdogTimer>>,
}

/// Reads a remote-published idle flag out of a resource-table-provided
/// shared-memory address, gating self-hibernation (§4.6).
struct ResourceTableIdleFlag {
    phys: Arc<dyn PhysMemory>,
    addr: u64,
}

impl IdleFlag for ResourceTableIdleFlag {
    fn is_idle(&self) -> bool {
        // SAFETY: `addr` names the one-byte suspend-flag location the
        // firmware loader reported for this remote's resource table; the
        // mapping is unconditionally torn down before returning.
        unsafe {
            match self.phys.map(self.addr, 1) {
                Ok(ptr) => {
                    let value = *ptr.as_ptr();
                    self.phys.unmap(ptr, 1);
                    value != 0
                }
                Err(_) => false,
            }
        }
    }
}

/// The module singleton (C10): owns the mailbox transport, the power/clock
/// coordinator, the optional self-hibernation policy, and the registry of
/// attached remotes, serialized by a single mutex per §5's concurrency
/// model.
///
/// Constructed once via [`Module::setup`] and torn down via
/// [`Module::destroy`] — deliberately not an auto-initializing [`spin::Lazy`]
/// like the teacher's `services::Services`, since §5 requires setup/destroy
/// to be externally sequenced rather than triggered by first use.
pub struct Module {
    config: ModuleConfig,
    #[allow(dead_code)]
    hal: Arc<dyn HalOps>,
    firmware: Arc<dyn FirmwareLoader>,
    #[allow(dead_code)]
    timer: Arc<dyn OsTimer>,
    power: PowerCoordinator,
    mailbox: Arc<MailboxSubsystem>,
    hibernation: Option<Arc<HibernationCoordinator>>,
    remotes: SpinMutex<HashMap<ProcId, RemoteEntry>>,
}

impl Module {
    /// Brings the module singleton up: installs the mailbox subsystem,
    /// the power coordinator, and (if `config.hib_enable`) an armed
    /// hibernation coordinator. No remote is attached yet.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] if the module is already set
    /// up, or [`ErrorKind::InvalidArg`] if `config.num_procs` exceeds
    /// [`ModuleConfig::MAX_PROCS`].
    ///
    /// Not thread-safe against a concurrent [`Module::destroy`] or a second
    /// `setup`; the caller is responsible for sequencing these externally,
    /// same as the original port's one-time module init.
    pub fn setup(
        config: ModuleConfig,
        hal: Arc<dyn HalOps>,
        firmware: Arc<dyn FirmwareLoader>,
        timer: Arc<dyn OsTimer>,
        power_manager: Option<Arc<dyn PowerManagerClient>>,
    ) -> Result<Arc<Module>> {
        if config.num_procs > ModuleConfig::MAX_PROCS {
            return Err(Error::with_context(ErrorKind::InvalidArg, "num_procs exceeds MAX_PROCS"));
        }

        let mut slot = MODULE.lock();
        if slot.is_some() {
            return Err(Error::new(ErrorKind::AlreadyExists));
        }

        let mailbox = Arc::new(MailboxSubsystem::new(hal.clone(), config.int_id));
        let power = PowerCoordinator::new(power_manager, timer.clone());
        let hib_enable = config.hib_enable;
        let hib_timeout_ms = config.hib_timeout_ms;
        let timer_for_hib = timer.clone();

        let module = Arc::new_cyclic(move |weak: &Weak<Module>| {
            let weak = weak.clone();
            let hibernation = if hib_enable {
                Some(Arc::new(HibernationCoordinator::new(
                    timer_for_hib,
                    hib_timeout_ms,
                    Box::new(move || match weak.upgrade() {
                        Some(module) => module.suspend_all(),
                        None => Ok(()),
                    }),
                )))
            } else {
                None
            };
            Module {
                config,
                hal,
                firmware,
                timer,
                power,
                mailbox,
                hibernation,
                remotes: SpinMutex::new(HashMap::new()),
            }
        });

        if let Some(hib) = &module.hibernation {
            hib.arm();
        }
        *slot = Some(module.clone());
        Ok(module)
    }

    /// Returns the live module singleton, or [`ErrorKind::InvalidState`] if
    /// [`Module::setup`] has not (yet, or any longer) been called.
    pub fn get() -> Result<Arc<Module>> {
        MODULE.lock().clone().ok_or(Error::new(ErrorKind::InvalidState))
    }

    /// Tears the module singleton down.
    ///
    /// Fails with [`ErrorKind::Busy`] if any remote is still attached — the
    /// caller must [`Module::detach`] everything first, matching §5's
    /// explicit-teardown-ordering requirement — or [`ErrorKind::InvalidState`]
    /// if the module was never set up.
    pub fn destroy() -> Result<()> {
        let mut slot = MODULE.lock();
        let module = slot.take().ok_or(Error::new(ErrorKind::InvalidState))?;
        if !module.remotes.lock().is_empty() {
            *slot = Some(module);
            return Err(Error::with_context(ErrorKind::Busy, "remotes still attached"));
        }
        if let Some(hib) = &module.hibernation {
            hib.disarm();
        }
        Ok(())
    }

    fn entry_channel(&self, proc_id: ProcId) -> Result<Arc<MqCopyChannel>> {
        let remotes = self.remotes.lock();
        let entry = remotes.get(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        Ok(Arc::clone(&entry.channel))
    }

    /// Attach sequence (§4.4 steps 1-5): parses the firmware resource table
    /// via [`hal::FirmwareLoader`], acquires the remote's power domain,
    /// builds its [`remoteproc::RemoteProcessor`] and per-remote
    /// [`mqcopy::MqCopyChannel`], and registers it with the mailbox
    /// subsystem.
    ///
    /// On any failure partway through, everything already acquired for this
    /// remote is released and the remote is left unregistered — a retry of
    /// `attach` with the same `proc_id` starts clean.
    pub fn attach(&self, proc_id: ProcId, params: AttachParams) -> Result<()> {
        let mut remotes = self.remotes.lock();
        if remotes.contains_key(&proc_id) {
            return Err(Error::new(ErrorKind::AlreadyExists));
        }
        if remotes.len() >= self.config.num_procs {
            return Err(Error::new(ErrorKind::TableFull));
        }

        let (table_entries, suspend_flag) = self.firmware.parse(proc_id)?;
        let mut static_entries = Vec::new();
        let mut pending = Vec::new();
        for entry in table_entries {
            if entry.is_mapped {
                pending.push(PendingMapping {
                    master_phys: entry.master_phys,
                    slave_virt: entry.slave_virt,
                    size: entry.size,
                    attrs: MapAttrs {
                        is_cached: entry.is_cached,
                        ..MapAttrs::default()
                    },
                });
            } else {
                static_entries.push(entry);
            }
        }

        let power_handle = self.power.enable(params.power_domain)?;

        let mut processor = RemoteProcessor::new(
            proc_id,
            &params.config,
            params.ops,
            params.l1_phys_base,
            params.l2_phys_base,
        );
        if let Err(e) = processor.attach(static_entries, pending) {
            drop(power_handle);
            return Err(e);
        }
        processor.set_power_handle(power_handle);

        let watchdog = params.watchdog_regs.map(|regs| {
            let watchdog = Arc::new(WatchdogTimer::new(proc_id, regs, params.watchdog_reload));
            processor.set_watchdog(Arc::clone(&watchdog));
            watchdog
        });

        let phys = Arc::clone(&params.phys);
        let channel = Arc::new(MqCopyChannel::new(params.phys, params.tx_ring_base, params.rx_ring_base));

        let dispatch_channel = Arc::clone(&channel);
        let register_result = self.mailbox.register(
            proc_id,
            params.mailbox_kind,
            params.mailbox_regs,
            Box::new(move |value: u32| {
                // Per §6: a recognized out-of-band command, or else the raw
                // FIFO word names the rx descriptor index for a VirtQueue
                // kick.
                if watchdog::classify_mailbox_word(value).is_none() {
                    if let Err(e) = dispatch_channel.handle_incoming(value as u16) {
                        log::warn!("module: proc {proc_id} rx dispatch failed: {e}");
                    }
                }
            }),
        );
        if let Err(e) = register_result {
            let _ = processor.detach();
            return Err(e);
        }

        if let Some(hib) = &self.hibernation {
            if let Some(addr) = suspend_flag {
                hib.add_idle_flag(Arc::new(ResourceTableIdleFlag { phys, addr: addr as u64 }));
            }
            let mailbox = Arc::clone(&self.mailbox);
            hib.add_pending_check(Box::new(move || mailbox.has_pending(proc_id).unwrap_or(true)));
        }

        remotes.insert(proc_id, RemoteEntry { processor, channel, watchdog });
        Ok(())
    }

    /// Detach sequence (§4.4): unregisters the remote's mailbox entry and
    /// releases its `RemoteProcessor` back to bookkeeping-only state. The
    /// remote's power handle (held inside its `RemoteProcessor`) is
    /// released as part of this, running the ordered hardware shutdown on
    /// the last reference.
    ///
    /// Fails with [`ErrorKind::NotFound`] if `proc_id` isn't attached; the
    /// remote is left in the registry, unchanged, if the processor's own
    /// detach sequence reports an error (e.g. it is still `Running`).
    pub fn detach(&self, proc_id: ProcId) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let mut entry = remotes.remove(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        if let Err(e) = entry.processor.detach() {
            remotes.insert(proc_id, entry);
            return Err(e);
        }
        if let Err(e) = self.mailbox.unregister(proc_id) {
            log::warn!("module: proc {proc_id} mailbox unregister failed during detach: {e}");
        }
        Ok(())
    }

    /// Writes the entry point, programs every deferred `map = true`
    /// mapping, releases reset, enables the remote's mailbox IRQ, and (if
    /// configured) arms its watchdog.
    pub fn start(&self, proc_id: ProcId, entry_point: u32) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        entry.processor.start(entry_point)?;
        self.mailbox.enable(proc_id)?;
        if let Some(watchdog) = &entry.watchdog {
            watchdog.start();
        }
        Ok(())
    }

    /// Disables the remote's mailbox IRQ and watchdog, then asserts reset
    /// and tears down its page tables.
    pub fn stop(&self, proc_id: ProcId) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        self.mailbox.disable(proc_id)?;
        if let Some(watchdog) = &entry.watchdog {
            watchdog.stop();
        }
        entry.processor.stop()
    }

    /// Suspend sequence (§4.4): saves mailbox IRQENABLE context, then the
    /// remote's own MMU/watchdog context, then asserts reset.
    pub fn suspend(&self, proc_id: ProcId) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        self.mailbox.save_context(proc_id)?;
        entry.processor.suspend()
    }

    /// Resume sequence (§4.4): the reverse of [`Module::suspend`].
    pub fn resume(&self, proc_id: ProcId) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        entry.processor.resume()?;
        self.mailbox.restore_context(proc_id)
    }

    /// Suspends every currently `Running` remote; used as the hibernation
    /// coordinator's suspend callback, and available directly for a
    /// caller-driven system-wide suspend.
    pub fn suspend_all(&self) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let mut first_err = None;
        for (proc_id, entry) in remotes.iter_mut() {
            if entry.processor.state() != ProcState::Running {
                continue;
            }
            if let Err(e) = self.mailbox.save_context(*proc_id) {
                first_err.get_or_insert(e);
            }
            if let Err(e) = entry.processor.suspend() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Call from the watchdog GP timer's overflow ISR for `proc_id`.
    /// Acknowledges the interrupt and, only if the timer had genuinely
    /// overflowed, forces the remote into [`ProcState::Watchdog`].
    /// Idempotent under spurious firing. A no-op if `proc_id` has no
    /// watchdog configured.
    pub fn on_watchdog_overflow(&self, proc_id: ProcId) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        let Some(watchdog) = &entry.watchdog else {
            return Ok(());
        };
        if watchdog.on_overflow() {
            entry.processor.mark_watchdog_fired()?;
        }
        Ok(())
    }

    /// Programs `[slave_virt, slave_virt+size)` into `proc_id`'s slave L2
    /// MMU, mapped to `master_phys`.
    pub fn map(&self, proc_id: ProcId, master_phys: u32, slave_virt: u32, size: u32, attrs: MapAttrs) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        entry.processor.map(master_phys, slave_virt, size, attrs)
    }

    /// Reverses [`Module::map`].
    pub fn unmap(&self, proc_id: ProcId, slave_virt: u32, size: u32) -> Result<()> {
        let mut remotes = self.remotes.lock();
        let entry = remotes.get_mut(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        entry.processor.unmap(slave_virt, size)
    }

    /// Translates a slave virtual address through `proc_id`'s address
    /// table.
    pub fn translate(&self, proc_id: ProcId, slave_virt: u32) -> Result<u32> {
        let remotes = self.remotes.lock();
        let entry = remotes.get(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
        entry.processor.translate(slave_virt)
    }

    /// Sends `payload` from `src` to `dst` over `proc_id`'s MQCopy channel
    /// and kicks its mailbox. Fails with [`ErrorKind::NoTransport`] if the
    /// remote isn't currently [`ProcState::Running`].
    pub fn send(&self, proc_id: ProcId, src: u32, dst: u32, payload: &[u8]) -> Result<()> {
        let channel = {
            let remotes = self.remotes.lock();
            let entry = remotes.get(&proc_id).ok_or(Error::new(ErrorKind::NotFound))?;
            if entry.processor.state() != ProcState::Running {
                return Err(Error::new(ErrorKind::NoTransport));
            }
            Arc::clone(&entry.channel)
        };
        let index = channel.send(src, dst, payload)?;
        self.mailbox.send(proc_id, index as u32)
    }

    /// Registers a new MQCopy endpoint on `proc_id`'s channel.
    pub fn create_endpoint(&self, proc_id: ProcId, requested: Option<u32>, name: Option<&str>) -> Result<u32> {
        self.entry_channel(proc_id)?.create(requested, name)
    }

    /// Unregisters an MQCopy endpoint on `proc_id`'s channel.
    pub fn delete_endpoint(&self, proc_id: ProcId, addr: u32) -> Result<()> {
        self.entry_channel(proc_id)?.delete(addr)
    }

    /// Installs the message-delivery callback for an endpoint already
    /// created via [`Module::create_endpoint`].
    pub fn set_delivery_callback(
        &self,
        proc_id: ProcId,
        addr: u32,
        callback: Box<dyn Fn(u32, &[u8]) + Send + Sync>,
    ) -> Result<()> {
        self.entry_channel(proc_id)?.set_delivery_callback(addr, callback)
    }

    /// Subscribes `addr`'s owner to CREATE/DESTROY announcements of other
    /// same-named endpoints on `proc_id`'s channel (§4.3), replaying for
    /// already-known matches.
    pub fn register_notify(
        &self,
        proc_id: ProcId,
        addr: u32,
        callback: Box<dyn Fn(mqcopy::NotifyEvent) + Send + Sync>,
    ) -> Result<()> {
        self.entry_channel(proc_id)?.register_notify(addr, callback)
    }

    /// Returns `proc_id`'s current lifecycle state.
    pub fn get_state(&self, proc_id: ProcId) -> Result<ProcState> {
        let remotes = self.remotes.lock();
        remotes
            .get(&proc_id)
            .map(|entry| entry.processor.state())
            .ok_or(Error::new(ErrorKind::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BootMode, Carveout, RemoteConfig};
    use crate::fakes::{FakeConfigSource, FakeFirmwareLoader, FakeHalOps, FakeOsTimer, FakePhysMemory, FakePowerManagerClient};
    use crate::regs::{gpt, mailbox as mailbox_regs};
    use crate::remoteproc::DspCore;
    use core::ptr::NonNull;
    use std::sync::Mutex as StdMutex;

    // `Module::setup`/`destroy` operate on one process-wide static; every
    // test below that touches it must hold this for its whole body or
    // parallel test threads race each other's `AlreadyExists`/`Busy`.
    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    // `remoteproc`'s own test module already provides `Default` for the
    // mmu/prcm/bootcfg register blocks; reuse those instead of a second,
    // conflicting impl here.
    fn leaked_block<T: Default>() -> MmioBlock<T> {
        let boxed = Box::new(T::default());
        let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
        // SAFETY: test-only leak; the block outlives every test.
        unsafe { MmioBlock::new(ptr) }
    }

    impl Default for mailbox_regs::RegisterBlock {
        fn default() -> Self {
            unsafe { core::mem::zeroed() }
        }
    }
    impl Default for gpt::RegisterBlock {
        fn default() -> Self {
            unsafe { core::mem::zeroed() }
        }
    }

    fn setup_test_module(num_procs: usize, hib_enable: bool) -> Arc<Module> {
        let hal: Arc<dyn HalOps> = Arc::new(FakeHalOps::new());
        let firmware = Arc::new(FakeFirmwareLoader::new());
        let timer: Arc<dyn OsTimer> = Arc::new(FakeOsTimer::new());
        Module::setup(
            ModuleConfig { int_id: 7, num_procs, hib_enable, hib_timeout_ms: 10 },
            hal,
            firmware,
            timer,
            None,
        )
        .unwrap()
    }

    fn attach_params() -> AttachParams {
        AttachParams {
            config: RemoteConfig { name: "dsp", mmu_enable: false, boot_mode: BootMode::NoLoadNoPwr, ..RemoteConfig::default() },
            ops: Arc::new(DspCore::new(leaked_block(), leaked_block(), leaked_block())),
            power_domain: PowerDomain::Dsp,
            mailbox_kind: RemoteKind::Dsp,
            mailbox_regs: leaked_block(),
            watchdog_regs: None,
            watchdog_reload: 0,
            phys: Arc::new(FakePhysMemory::new()),
            l1_phys_base: 0x9000_0000,
            l2_phys_base: 0x9100_0000,
            tx_ring_base: 0x9200_0000,
            rx_ring_base: 0x9300_0000,
        }
    }

    #[test]
    fn setup_rejects_oversized_num_procs() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let hal: Arc<dyn HalOps> = Arc::new(FakeHalOps::new());
        let err = Module::setup(
            ModuleConfig { int_id: 7, num_procs: ModuleConfig::MAX_PROCS + 1, hib_enable: false, hib_timeout_ms: 0 },
            hal,
            Arc::new(FakeFirmwareLoader::new()),
            Arc::new(FakeOsTimer::new()),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
        assert!(Module::get().is_err());
    }

    #[test]
    fn setup_twice_reports_already_exists() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _module = setup_test_module(4, false);
        let hal: Arc<dyn HalOps> = Arc::new(FakeHalOps::new());
        let err = Module::setup(
            ModuleConfig { int_id: 7, num_procs: 4, hib_enable: false, hib_timeout_ms: 0 },
            hal,
            Arc::new(FakeFirmwareLoader::new()),
            Arc::new(FakeOsTimer::new()),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        Module::destroy().unwrap();
    }

    #[test]
    fn attach_start_send_detach_round_trip() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let module = setup_test_module(4, false);

        module.attach(0, attach_params()).unwrap();
        assert_eq!(module.get_state(0).unwrap(), ProcState::Loaded);

        module.start(0, 0x8000_0000).unwrap();
        assert_eq!(module.get_state(0).unwrap(), ProcState::Running);

        let addr = module.create_endpoint(0, None, Some("telemetry")).unwrap();
        assert!(addr >= mqcopy::MAX_RESERVED);

        module.send(0, addr, addr, b"hello").unwrap();

        module.stop(0).unwrap();
        assert_eq!(module.get_state(0).unwrap(), ProcState::Stopped);

        module.detach(0).unwrap();
        assert!(module.get_state(0).is_err());

        Module::destroy().unwrap();
    }

    #[test]
    fn attach_duplicate_proc_id_rejected() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let module = setup_test_module(4, false);
        module.attach(0, attach_params()).unwrap();
        let err = module.attach(0, attach_params()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        module.detach(0).unwrap();
        Module::destroy().unwrap();
    }

    #[test]
    fn attach_beyond_num_procs_reports_table_full() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let module = setup_test_module(1, false);
        module.attach(0, attach_params()).unwrap();
        let err = module.attach(1, attach_params()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TableFull);
        module.detach(0).unwrap();
        Module::destroy().unwrap();
    }

    #[test]
    fn send_before_start_reports_no_transport() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let module = setup_test_module(4, false);
        module.attach(0, attach_params()).unwrap();
        let err = module.send(0, 0, 0, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoTransport);
        module.detach(0).unwrap();
        Module::destroy().unwrap();
    }

    #[test]
    fn destroy_with_live_remote_reports_busy() {
        let module = setup_test_module(4, false);
        module.attach(0, attach_params()).unwrap();
        let err = Module::destroy().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        module.detach(0).unwrap();
        Module::destroy().unwrap();
    }

    #[test]
    fn hibernation_suspends_quiescent_running_remote() {
        let module = setup_test_module(4, true);
        module.attach(0, attach_params()).unwrap();
        module.start(0, 0x8000_0000).unwrap();
        assert_eq!(module.get_state(0).unwrap(), ProcState::Running);

        // No suspend-flag address was configured for this fake remote, so
        // it never gates hibernation; the only pending-check is the
        // mailbox's own (empty) rx FIFO.
        let hib = module.hibernation.as_ref().unwrap().clone();
        assert!(hib.quiescent());

        module.suspend_all().unwrap();
        assert_eq!(module.get_state(0).unwrap(), ProcState::Suspended);

        module.resume(0).unwrap();
        assert_eq!(module.get_state(0).unwrap(), ProcState::Running);
        module.stop(0).unwrap();
        module.detach(0).unwrap();
        Module::destroy().unwrap();
    }

    #[test]
    fn config_source_and_power_manager_fakes_are_usable_collaborators() {
        // Exercises the remaining two capability traits' fakes directly;
        // `Module` reaches `ConfigSource` only through caller-side config
        // parsing, which is out of this crate's scope (hal.rs doc comment).
        let mut values = std::collections::HashMap::new();
        values.insert("dsp.carveout".to_owned(), "0x9000_0000".to_owned());
        let config = FakeConfigSource::new(values);
        assert_eq!(config.get("dsp.carveout").as_deref(), Some("0x9000_0000"));
        assert_eq!(config.get("missing"), None);

        let pm = FakePowerManagerClient::new();
        let timer: Arc<dyn OsTimer> = Arc::new(FakeOsTimer::new());
        let coordinator = PowerCoordinator::new(Some(Arc::new(pm)), timer);
        coordinator.request_opp("iva", 2).unwrap();
        let _ = Carveout { phys: 0x9000_0000, size: 0x10_0000 };
        let _ = StdMutex::new(());
    }
}
