// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Power/clock coordinator (C6): reference-counted gating of the IVA, DSP,
//! and IPU power domains, plus OPP/DVFS request forwarding.
//!
//! Per §9's Design Note, the "on" state is represented at the type level:
//! acquiring a domain returns a [`PowerHandle`] RAII guard whose `Drop`
//! performs the disable. Only the first acquisition (a `0 -> 1` refcount
//! crossing) runs the ordered hardware bring-up; only the last drop
//! (`1 -> 0`) runs teardown. Cloning a handle only bumps the count.

use crate::error::{Error, ErrorKind, Result};
use crate::hal::{OsTimer, PowerManagerClient};
use crate::regs::prcm::RegisterBlock as PrcmRegs;
use crate::regs::MmioBlock;
use log::{debug, warn};
use spin::mutex::SpinMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bounded poll count for clock/reset status bits, per §4.4's error policy
/// (hardware timeouts are reported deterministically rather than spun on
/// forever).
const MAX_POLLS: u32 = 100;
/// Minimum delay, per §4.5 step 5, between releasing ICONT1's sub-reset and
/// ICONT2's.
const ICONT_STAGGER: Duration = Duration::from_micros(1);

/// A logical power resource this coordinator gates, per §3's
/// `PowerDomainRefs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerDomain {
    Iva,
    IvaSeq0,
    IvaSeq1,
    Dsp,
    Ipu(u8),
    GpTimer(u8),
}

struct DomainState {
    refcount: AtomicU32,
    regs: Option<MmioBlock<PrcmRegs>>,
}

/// Reference-counted enable/disable gating for every logical power domain,
/// serialized by a single module mutex (§5: "no reentrant enable/disable
/// across threads").
pub struct PowerCoordinator {
    domains: SpinMutex<HashMap<PowerDomain, Arc<DomainState>>>,
    power_manager: Option<Arc<dyn PowerManagerClient>>,
    timer: Arc<dyn OsTimer>,
}

impl PowerCoordinator {
    /// Creates a coordinator with no domains registered yet. `timer` backs
    /// the inter-step delays in the bring-up sequence (§4.5 step 5) the same
    /// way [`crate::watchdog`] uses it for its own bounded waits.
    pub fn new(power_manager: Option<Arc<dyn PowerManagerClient>>, timer: Arc<dyn OsTimer>) -> Self {
        Self {
            domains: SpinMutex::new(HashMap::new()),
            power_manager,
            timer,
        }
    }

    /// Registers the PRCM register block backing `domain`. Must be called
    /// before the first [`PowerCoordinator::enable`] for that domain.
    pub fn register_domain(&self, domain: PowerDomain, regs: MmioBlock<PrcmRegs>) {
        self.domains.lock().insert(
            domain,
            Arc::new(DomainState {
                refcount: AtomicU32::new(0),
                regs: Some(regs),
            }),
        );
    }

    fn state(&self, domain: PowerDomain) -> Arc<DomainState> {
        let mut domains = self.domains.lock();
        domains
            .entry(domain)
            .or_insert_with(|| {
                Arc::new(DomainState {
                    refcount: AtomicU32::new(0),
                    regs: None,
                })
            })
            .clone()
    }

    /// Takes a reference on `domain`, returning a [`PowerHandle`]. Performs
    /// the ordered hardware bring-up only on the `0 -> 1` crossing.
    pub fn enable(&self, domain: PowerDomain) -> Result<PowerHandle> {
        let state = self.state(domain);
        let prior = state.refcount.fetch_add(1, Ordering::AcqRel);
        if prior == 0 {
            if let Some(regs) = &state.regs {
                if let Err(e) = bring_up_iva_sequence(regs, self.timer.as_ref()) {
                    state.refcount.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
            }
            debug!("power: {domain:?} 0 -> 1, hardware enabled");
        }
        Ok(PowerHandle {
            domain,
            state,
            released: false,
        })
    }

    /// Returns the current reference count for `domain` (0 if never
    /// acquired).
    pub fn refcount(&self, domain: PowerDomain) -> u32 {
        self.domains
            .lock()
            .get(&domain)
            .map(|s| s.refcount.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Forwards an OPP/DVFS request for `domain` to the external power
    /// manager; this coordinator keeps no frequency state of its own
    /// (§4.5).
    pub fn request_opp(&self, domain: &str, opp: u32) -> Result<()> {
        match &self.power_manager {
            Some(pm) => pm.request_opp(domain, opp),
            None => Err(Error::new(ErrorKind::NotSupported)),
        }
    }
}

/// The ordered IVA domain bring-up sequence of §4.5, steps 1-7.
fn bring_up_iva_sequence(regs: &PrcmRegs, timer: &dyn OsTimer) -> Result<()> {
    use crate::regs::prcm::{CLKSTCTRL, PWRSTCTRL};
    use tock_registers::interfaces::Writeable;

    regs.clear_context_lost();
    regs.PWRSTCTRL.write(PWRSTCTRL::POWERSTATE::On);
    regs.CLKSTCTRL.write(CLKSTCTRL::CLKTRCTRL::SwWakeup);

    // Enable the core and SL2 clocks; the teacher's poll-bound pattern:
    // a bounded spin rather than an unbounded wait.
    let mut activity = false;
    for _ in 0..MAX_POLLS {
        if regs.core_clock_functional() || regs.sl2_clock_functional() {
            activity = true;
            break;
        }
    }
    if !activity {
        warn!("power: iva clock activity bit never asserted");
    }

    release_sub_reset(regs, 0)?;
    timer.sleep(ICONT_STAGGER);
    release_sub_reset(regs, 1)?;
    timer.sleep(ICONT_STAGGER);
    release_sub_reset(regs, 2)?;

    for _ in 0..MAX_POLLS {
        if regs.core_clock_functional() && regs.sl2_clock_functional() {
            regs.CLKSTCTRL.write(CLKSTCTRL::CLKTRCTRL::HwAuto);
            return Ok(());
        }
    }
    Err(Error::with_context(
        ErrorKind::IoError,
        "iva clock never reached functional idle-status",
    ))
}

fn release_sub_reset(regs: &PrcmRegs, bit: u8) -> Result<()> {
    use crate::regs::prcm::{RSTCTRL, RSTST};
    use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

    match bit {
        0 => regs.RSTCTRL.modify(RSTCTRL::RST1::CLEAR),
        1 => regs.RSTCTRL.modify(RSTCTRL::RST2::CLEAR),
        _ => regs.RSTCTRL.modify(RSTCTRL::RST3::CLEAR),
    }
    for _ in 0..MAX_POLLS {
        let asserted = match bit {
            0 => regs.RSTST.is_set(RSTST::RST1ST),
            1 => regs.RSTST.is_set(RSTST::RST2ST),
            _ => regs.RSTST.is_set(RSTST::RST3ST),
        };
        if asserted {
            return Ok(());
        }
    }
    Err(Error::with_context(
        ErrorKind::IoError,
        "sub-reset release never asserted",
    ))
}

/// The reverse of [`bring_up_iva_sequence`]: force-OFF with power-state set
/// to OFF at the end, bounded-polled throughout per §9's "the spec requires
/// the bounded poll on all paths for determinism" correction of the legacy
/// unchecked shutdown path.
fn shut_down_iva_sequence(regs: &PrcmRegs) -> Result<()> {
    use crate::regs::prcm::{CLKSTCTRL, PWRSTCTRL, RSTCTRL, PWRSTST};
    use tock_registers::interfaces::{ReadWriteable, Readable, Writeable};

    regs.CLKSTCTRL.write(CLKSTCTRL::CLKTRCTRL::SwSleep);
    regs.RSTCTRL
        .modify(RSTCTRL::RST1::SET + RSTCTRL::RST2::SET + RSTCTRL::RST3::SET);
    regs.PWRSTCTRL.write(PWRSTCTRL::POWERSTATE::Off);

    for _ in 0..MAX_POLLS {
        if regs.PWRSTST.read(PWRSTST::POWERSTATEST) == 0 {
            return Ok(());
        }
    }
    Err(Error::with_context(
        ErrorKind::IoError,
        "iva power state never reached off",
    ))
}

/// RAII guard representing one reference on a [`PowerDomain`]. Dropping the
/// last outstanding handle runs the ordered hardware shutdown.
pub struct PowerHandle {
    domain: PowerDomain,
    state: Arc<DomainState>,
    released: bool,
}

impl Clone for PowerHandle {
    fn clone(&self) -> Self {
        self.state.refcount.fetch_add(1, Ordering::AcqRel);
        Self {
            domain: self.domain,
            state: self.state.clone(),
            released: false,
        }
    }
}

impl PowerHandle {
    /// The domain this handle holds a reference on.
    pub fn domain(&self) -> PowerDomain {
        self.domain
    }

    /// Explicitly releases this handle, returning any hardware-shutdown
    /// error instead of silently logging it as `Drop` would.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let result = if self.state.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            match &self.state.regs {
                Some(regs) => shut_down_iva_sequence(regs),
                None => Ok(()),
            }
        } else {
            Ok(())
        };
        if result.is_ok() {
            debug!("power: {:?} refcount crossed to 0, hardware disabled", self.domain);
        }
        result
    }
}

impl Drop for PowerHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.state.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(regs) = &self.state.regs {
                if let Err(e) = shut_down_iva_sequence(regs) {
                    warn!("power: {:?} shutdown on drop failed: {e}", self.domain);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeOsTimer;

    fn fake_timer() -> Arc<dyn OsTimer> {
        Arc::new(FakeOsTimer::new())
    }

    #[test]
    fn enable_without_registered_regs_still_counts() {
        let coordinator = PowerCoordinator::new(None, fake_timer());
        let a = coordinator.enable(PowerDomain::Dsp).unwrap();
        assert_eq!(coordinator.refcount(PowerDomain::Dsp), 1);
        let b = a.clone();
        assert_eq!(coordinator.refcount(PowerDomain::Dsp), 2);
        drop(a);
        assert_eq!(coordinator.refcount(PowerDomain::Dsp), 1);
        drop(b);
        assert_eq!(coordinator.refcount(PowerDomain::Dsp), 0);
    }

    #[test]
    fn request_opp_without_power_manager_is_not_supported() {
        let coordinator = PowerCoordinator::new(None, fake_timer());
        let err = coordinator.request_opp("iva", 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    struct RecordingPowerManager {
        last: SpinMutex<Option<(String, u32)>>,
    }

    impl PowerManagerClient for RecordingPowerManager {
        fn request_opp(&self, domain: &str, opp: u32) -> Result<()> {
            *self.last.lock() = Some((domain.to_owned(), opp));
            Ok(())
        }
    }

    #[test]
    fn request_opp_forwards_to_power_manager() {
        let pm = Arc::new(RecordingPowerManager { last: SpinMutex::new(None) });
        let coordinator = PowerCoordinator::new(Some(pm.clone()), fake_timer());
        coordinator.request_opp("iva", 3).unwrap();
        assert_eq!(*pm.last.lock(), Some(("iva".to_owned(), 3)));
    }

    #[test]
    fn enable_uses_injected_timer_instead_of_real_sleep() {
        // The fake timer's `sleep` returns immediately; if `enable` ever
        // regressed to `std::thread::sleep` directly this test would still
        // pass functionally but would take real wall-clock time instead of
        // none, which is the point of injecting it at all.
        let coordinator = PowerCoordinator::new(None, fake_timer());
        let handle = coordinator.enable(PowerDomain::Dsp).unwrap();
        assert_eq!(coordinator.refcount(PowerDomain::Dsp), 1);
        drop(handle);
    }
}
