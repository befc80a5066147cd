// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Remote-processor lifecycle (C5): attach, MMU programming, entry-point
//! setup, reset release, suspend/resume, stop, and detach for a single
//! remote core, per §4.4 and the state machine of §3/§4.4.
//!
//! Per §9's "function-pointer table" Design Note, the hardware specifics
//! that differ across DSP/IPU1/IPU2 are reached through a small
//! [`RemoteCoreOps`] capability set rather than inheritance; the state
//! machine below calls into it uniformly. `map`/`unmap`/`translate` are not
//! part of that capability set: the L2 MMU engine (C2, [`crate::mmu`]) is
//! identical hardware across all three variants, so `RemoteProcessor` calls
//! it directly instead of dispatching through the per-variant trait object.

pub mod addrtable;

pub use addrtable::{AddrMapping, AddrTable, MapMask, ADDR_NONE};

use crate::config::{BootMode, RemoteConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::hal::ProcId;
use crate::mmu::pte::MapAttrs;
use crate::mmu::MmuContext;
use crate::power::PowerHandle;
use crate::regs::bootcfg::RegisterBlock as BootCfgRegs;
use crate::regs::mmu::RegisterBlock as MmuRegs;
use crate::regs::prcm::RegisterBlock as PrcmRegs;
use crate::regs::MmioBlock;
use crate::watchdog::WatchdogTimer;
use log::{debug, info, warn};
use std::sync::Arc;

/// Bounded poll count for CPU reset-status assertion, per §4.4's error
/// policy ("Hardware timeouts... typ. 100 polls").
const MAX_RESET_POLLS: u32 = 100;

/// The lifecycle state of one remote core (§3), exactly one of which holds
/// at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unknown,
    Loaded,
    Running,
    Suspended,
    Watchdog,
    Stopped,
}

/// Which hardware variant a [`RemoteCoreOps`] implementation drives, used
/// by the caller to pick the matching mailbox FIFO assignment (§6); this
/// crate's state machine itself never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreVariant {
    Dsp,
    Ipu1,
    Ipu2,
}

/// The per-variant capability set replacing the original port's
/// per-remote "fxnTable" (§9). Selected once per `proc_id` at attach time
/// and held as `Arc<dyn RemoteCoreOps>` for the remote's lifetime.
pub trait RemoteCoreOps: Send + Sync {
    /// The hardware variant this implementation drives.
    fn variant(&self) -> CoreVariant;
    /// This remote's slave L2 MMU register block.
    fn mmu_regs(&self) -> &MmioBlock<MmuRegs>;
    /// This remote's PRCM register block (power-domain control).
    fn prcm_regs(&self) -> &MmioBlock<PrcmRegs>;
    /// This remote's boot-entry/CPU-reset register block.
    fn boot_regs(&self) -> &MmioBlock<BootCfgRegs>;
}

macro_rules! core_variant {
    ($name:ident, $doc:expr, $variant:expr) => {
        #[doc = $doc]
        pub struct $name {
            mmu: MmioBlock<MmuRegs>,
            prcm: MmioBlock<PrcmRegs>,
            boot: MmioBlock<BootCfgRegs>,
        }

        impl $name {
            /// Wraps the three register-block windows backing this
            /// remote's hardware-specific operations.
            pub fn new(
                mmu: MmioBlock<MmuRegs>,
                prcm: MmioBlock<PrcmRegs>,
                boot: MmioBlock<BootCfgRegs>,
            ) -> Self {
                Self { mmu, prcm, boot }
            }
        }

        impl RemoteCoreOps for $name {
            fn variant(&self) -> CoreVariant {
                $variant
            }

            fn mmu_regs(&self) -> &MmioBlock<MmuRegs> {
                &self.mmu
            }

            fn prcm_regs(&self) -> &MmioBlock<PrcmRegs> {
                &self.prcm
            }

            fn boot_regs(&self) -> &MmioBlock<BootCfgRegs> {
                &self.boot
            }
        }
    };
}

core_variant!(DspCore, "The DSP remote core.", CoreVariant::Dsp);
core_variant!(Ipu1Core, "The first Cortex-M (IPU) remote core.", CoreVariant::Ipu1);
core_variant!(Ipu2Core, "The second Cortex-M (IPU) remote core.", CoreVariant::Ipu2);

/// A pending address-space entry surfaced by the firmware's resource table
/// that requires hardware L2-MMU programming (the `map = true` list of
/// §4.4 step 3), deferred until [`RemoteProcessor::start`].
#[derive(Debug, Clone, Copy)]
pub struct PendingMapping {
    pub master_phys: u32,
    pub slave_virt: u32,
    pub size: u32,
    pub attrs: MapAttrs,
}

/// One remote core's full lifecycle state: identity, MMU context, boot
/// entry, power reference, optional watchdog, and the hardware capability
/// set of [`RemoteCoreOps`].
pub struct RemoteProcessor {
    proc_id: ProcId,
    name: &'static str,
    state: ProcState,
    mmu_enable: bool,
    boot_mode: BootMode,
    l1_phys_base: u32,
    l2_pool_size: u32,
    l2_phys_base: u32,
    mmu: MmuContext,
    ops: Arc<dyn RemoteCoreOps>,
    pending_mappings: Vec<PendingMapping>,
    power_handle: Option<PowerHandle>,
    watchdog: Option<Arc<WatchdogTimer>>,
}

impl RemoteProcessor {
    /// Creates a remote in the [`ProcState::Unknown`] state; call
    /// [`RemoteProcessor::attach`] before anything else.
    pub fn new(
        proc_id: ProcId,
        config: &RemoteConfig,
        ops: Arc<dyn RemoteCoreOps>,
        l1_phys_base: u32,
        l2_phys_base: u32,
    ) -> Self {
        Self {
            proc_id,
            name: config.name,
            state: ProcState::Unknown,
            mmu_enable: config.mmu_enable,
            boot_mode: config.boot_mode,
            l1_phys_base,
            l2_pool_size: config.l2_pool_size as u32,
            l2_phys_base,
            mmu: MmuContext::new(config.l2_pool_size, l2_phys_base),
            ops,
            pending_mappings: Vec::new(),
            power_handle: None,
            watchdog: None,
        }
    }

    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    /// Installs the watchdog timer dedicated to this remote (§4.6).
    pub fn set_watchdog(&mut self, watchdog: Arc<WatchdogTimer>) {
        self.watchdog = Some(watchdog);
    }

    /// Attach sequence (§4.4 steps 1-5).
    ///
    /// `static_entries` are the firmware resource table's `map = false`
    /// records (address-table bookkeeping only); `pending` are the
    /// `map = true` records, deferred to [`RemoteProcessor::start`].
    /// Builds a fresh [`MmuContext`] and only commits it on full success,
    /// so a failure partway through leaves no partial mapping and the
    /// remote stays [`ProcState::Unknown`] (§7).
    pub fn attach(
        &mut self,
        static_entries: Vec<AddrMapping>,
        pending: Vec<PendingMapping>,
    ) -> Result<()> {
        if self.state != ProcState::Unknown {
            return Err(Error::new(ErrorKind::InvalidState));
        }

        let mut mmu = MmuContext::new(self.l2_pool_size as usize, self.l2_phys_base);
        for entry in static_entries {
            mmu.addr_table_mut().insert_static(entry)?;
        }

        if self.mmu_enable && self.boot_mode.programs_mmu() {
            mmu.enable(self.ops.mmu_regs(), self.l1_phys_base);
        }

        self.mmu = mmu;
        self.pending_mappings = pending;
        self.state = ProcState::Loaded;
        info!("remoteproc[{}]: attached ({} pending mappings)", self.proc_id, self.pending_mappings.len());
        Ok(())
    }

    /// Start sequence (§4.4): write the entry point, program every pending
    /// `map = true` mapping (failing fast on the first error, per §7
    /// leaving the MMU configured with whatever succeeded so far), then
    /// release reset.
    pub fn start(&mut self, entry: u32) -> Result<()> {
        if self.state != ProcState::Loaded {
            return Err(Error::new(ErrorKind::InvalidState));
        }

        self.ops.boot_regs().set_boot_entry(entry);

        if self.mmu_enable {
            let pending = std::mem::take(&mut self.pending_mappings);
            for mapping in &pending {
                self.mmu
                    .map(mapping.master_phys, mapping.slave_virt, mapping.size, mapping.attrs)?;
            }
        }

        if !self
            .ops
            .boot_regs()
            .release_reset(MAX_RESET_POLLS)
        {
            return Err(Error::with_context(ErrorKind::IoError, "cpu reset never released"));
        }

        self.state = ProcState::Running;
        info!("remoteproc[{}]: running, entry=0x{entry:08x}", self.proc_id);
        Ok(())
    }

    /// Stop sequence (§4.4): assert reset, tear down the page tables if
    /// the MMU was enabled.
    pub fn stop(&mut self) -> Result<()> {
        if !matches!(self.state, ProcState::Running | ProcState::Watchdog) {
            return Err(Error::new(ErrorKind::InvalidState));
        }

        self.ops.boot_regs().assert_reset();
        if self.mmu_enable {
            self.mmu.disable(self.ops.mmu_regs());
            self.mmu = MmuContext::new(self.l2_pool_size as usize, self.l2_phys_base);
        }

        self.state = ProcState::Stopped;
        info!("remoteproc[{}]: stopped", self.proc_id);
        Ok(())
    }

    /// Suspend sequence (§4.4): MMU save, watchdog save+stop+disable,
    /// reset CPU and MMU.
    pub fn suspend(&mut self) -> Result<()> {
        if self.state != ProcState::Running {
            return Err(Error::new(ErrorKind::InvalidState));
        }

        self.mmu.save_context(self.ops.mmu_regs());
        if let Some(watchdog) = &self.watchdog {
            watchdog.save();
            watchdog.stop();
        }
        self.ops.boot_regs().assert_reset();
        self.mmu.disable(self.ops.mmu_regs());

        self.state = ProcState::Suspended;
        debug!("remoteproc[{}]: suspended", self.proc_id);
        Ok(())
    }

    /// Resume sequence (§4.4): MMU restore, watchdog enable+restore+start,
    /// release reset.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != ProcState::Suspended {
            return Err(Error::new(ErrorKind::InvalidState));
        }

        self.mmu.restore_context(self.ops.mmu_regs());
        if let Some(watchdog) = &self.watchdog {
            watchdog.start();
        }
        if !self.ops.boot_regs().release_reset(MAX_RESET_POLLS) {
            return Err(Error::with_context(ErrorKind::IoError, "cpu reset never released on resume"));
        }

        self.state = ProcState::Running;
        debug!("remoteproc[{}]: resumed", self.proc_id);
        Ok(())
    }

    /// Detach sequence (§4.4): disables the MMU and clears dynamic address
    /// entries (static entries are kept), releasing everything back to
    /// [`ProcState::Unknown`].
    pub fn detach(&mut self) -> Result<()> {
        if !matches!(self.state, ProcState::Loaded | ProcState::Stopped) {
            return Err(Error::new(ErrorKind::InvalidState));
        }

        if matches!(self.boot_mode, BootMode::Boot | BootMode::NoLoadPwr) {
            self.mmu.disable(self.ops.mmu_regs());
            self.mmu.addr_table_mut().clear_dynamic();
        }
        self.power_handle = None;
        self.pending_mappings.clear();

        self.state = ProcState::Unknown;
        info!("remoteproc[{}]: detached", self.proc_id);
        Ok(())
    }

    /// Forces a [`ProcState::Running`] remote into [`ProcState::Watchdog`],
    /// called by the watchdog ISR glue (§4.6). Recovery requires explicit
    /// `stop` + `start`.
    pub fn mark_watchdog_fired(&mut self) -> Result<()> {
        if self.state != ProcState::Running {
            return Err(Error::new(ErrorKind::InvalidState));
        }
        warn!("remoteproc[{}]: watchdog fired", self.proc_id);
        self.state = ProcState::Watchdog;
        Ok(())
    }

    /// Maps `[slave_virt, slave_virt+size)` dynamically, for callers that
    /// add mappings after start (e.g. a DMA buffer carveout requested at
    /// runtime).
    pub fn map(&mut self, master_phys: u32, slave_virt: u32, size: u32, attrs: MapAttrs) -> Result<()> {
        self.mmu.map(master_phys, slave_virt, size, attrs)
    }

    /// Reverses [`RemoteProcessor::map`].
    pub fn unmap(&mut self, slave_virt: u32, size: u32) -> Result<()> {
        self.mmu.unmap(slave_virt, size)
    }

    /// Translates a slave virtual address, falling back to identity
    /// mapping when this remote's MMU is disabled (a per-remote choice
    /// documented at attach, per §4.1).
    pub fn translate(&self, slave_virt: u32) -> Result<u32> {
        match self.mmu.translate(slave_virt) {
            Ok(phys) => Ok(phys),
            Err(e) if !self.mmu_enable && e.kind() == ErrorKind::NotMapped => Ok(slave_virt),
            Err(e) => Err(e),
        }
    }

    /// Attaches a power-domain reference this remote holds for the
    /// duration of its `Loaded`/`Running` lifetime.
    pub fn set_power_handle(&mut self, handle: PowerHandle) {
        self.power_handle = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::regs::{bootcfg, mmu as mmu_regs, prcm};
    use core::ptr::NonNull;

    fn leaked_block<T: Default>() -> MmioBlock<T> {
        let boxed = Box::new(T::default());
        let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
        // SAFETY: test-only leak; the block outlives every test.
        unsafe { MmioBlock::new(ptr) }
    }

    impl Default for mmu_regs::RegisterBlock {
        fn default() -> Self {
            unsafe { core::mem::zeroed() }
        }
    }
    impl Default for prcm::RegisterBlock {
        fn default() -> Self {
            unsafe { core::mem::zeroed() }
        }
    }
    impl Default for bootcfg::RegisterBlock {
        fn default() -> Self {
            unsafe { core::mem::zeroed() }
        }
    }

    fn dsp() -> RemoteProcessor {
        let ops: Arc<dyn RemoteCoreOps> = Arc::new(DspCore::new(
            leaked_block(),
            leaked_block(),
            leaked_block(),
        ));
        let config = RemoteConfig {
            name: "dsp",
            ..RemoteConfig::default()
        };
        RemoteProcessor::new(0, &config, ops, 0x9000_0000, 0x9100_0000)
    }

    #[test]
    fn attach_requires_unknown_state() {
        let mut proc = dsp();
        proc.attach(Vec::new(), Vec::new()).unwrap();
        assert_eq!(proc.state(), ProcState::Loaded);
        let err = proc.attach(Vec::new(), Vec::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn start_then_stop_round_trip() {
        let mut proc = dsp();
        proc.attach(Vec::new(), Vec::new()).unwrap();
        proc.start(0x8000_1000).unwrap();
        assert_eq!(proc.state(), ProcState::Running);
        proc.stop().unwrap();
        assert_eq!(proc.state(), ProcState::Stopped);
    }

    #[test]
    fn suspend_resume_preserves_translate() {
        let mut proc = dsp();
        proc.attach(
            Vec::new(),
            vec![PendingMapping {
                master_phys: 0x8000_0000,
                slave_virt: 0x6000_0000,
                size: 0x1000,
                attrs: MapAttrs::default(),
            }],
        )
        .unwrap();
        proc.start(0x8000_0000).unwrap();
        assert_eq!(proc.translate(0x6000_0010).unwrap(), 0x8000_0010);

        proc.suspend().unwrap();
        assert_eq!(proc.state(), ProcState::Suspended);
        proc.resume().unwrap();
        assert_eq!(proc.state(), ProcState::Running);
        assert_eq!(proc.translate(0x6000_0010).unwrap(), 0x8000_0010);
    }

    #[test]
    fn watchdog_forces_running_to_watchdog_state() {
        let mut proc = dsp();
        proc.attach(Vec::new(), Vec::new()).unwrap();
        proc.start(0x8000_0000).unwrap();
        proc.mark_watchdog_fired().unwrap();
        assert_eq!(proc.state(), ProcState::Watchdog);
    }

    #[test]
    fn detach_from_loaded_returns_to_unknown() {
        let mut proc = dsp();
        proc.attach(Vec::new(), Vec::new()).unwrap();
        proc.detach().unwrap();
        assert_eq!(proc.state(), ProcState::Unknown);
    }

    #[test]
    fn disabled_mmu_falls_back_to_identity_translate() {
        let ops: Arc<dyn RemoteCoreOps> = Arc::new(DspCore::new(
            leaked_block(),
            leaked_block(),
            leaked_block(),
        ));
        let config = RemoteConfig {
            name: "dsp",
            mmu_enable: false,
            ..RemoteConfig::default()
        };
        let mut proc = RemoteProcessor::new(0, &config, ops, 0, 0);
        proc.attach(Vec::new(), Vec::new()).unwrap();
        proc.start(0).unwrap();
        assert_eq!(proc.translate(0x1234).unwrap(), 0x1234);
    }
}
