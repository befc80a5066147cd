// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Crate-level integration tests for the §8-style end-to-end scenarios
//! (S1-S6), driven entirely through the public API against the `fakes`
//! capability implementations — no real MMIO, matching how the unit tests
//! exercise the same fakes from inside each module.
//!
//! Run with `cargo test --features fakes` (the `fakes` module is gated
//! behind that feature outside of `cfg(test)`, since `tests/` binaries link
//! the crate as a normal dependency rather than compiling it in test mode).

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tock_registers::interfaces::Writeable;

use vayu_remoteproc::config::{BootMode, ModuleConfig, RemoteConfig};
use vayu_remoteproc::error::ErrorKind;
use vayu_remoteproc::fakes::{FakeFirmwareLoader, FakeHalOps, FakeOsTimer, FakePhysMemory};
use vayu_remoteproc::hal::{HalOps, OsTimer, PhysMemory};
use vayu_remoteproc::mailbox::RemoteKind;
use vayu_remoteproc::mmu::pte::MapAttrs;
use vayu_remoteproc::mqcopy::{self, MqCopyChannel, NotifyEvent};
use vayu_remoteproc::power::PowerDomain;
use vayu_remoteproc::regs::bootcfg::RegisterBlock as BootCfgRegs;
use vayu_remoteproc::regs::gpt::{RegisterBlock as GptRegs, IRQ};
use vayu_remoteproc::regs::mailbox::RegisterBlock as MailboxRegs;
use vayu_remoteproc::regs::mmu::RegisterBlock as MmuRegs;
use vayu_remoteproc::regs::prcm::RegisterBlock as PrcmRegs;
use vayu_remoteproc::regs::MmioBlock;
use vayu_remoteproc::remoteproc::{DspCore, ProcState, RemoteCoreOps};
use vayu_remoteproc::virtqueue::VirtQueue;
use vayu_remoteproc::AttachParams;
use vayu_remoteproc::Module;

// `Module::setup`/`destroy` operate on one process-wide static; every test
// below that touches it must hold this for its whole body or parallel test
// threads race each other's `AlreadyExists`/`Busy`.
static TEST_LOCK: Mutex<()> = Mutex::new(());

fn leaked_block<T>(zeroed: T) -> MmioBlock<T> {
    let boxed = Box::new(zeroed);
    let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
    // SAFETY: test-only leak; the block outlives the test process.
    unsafe { MmioBlock::new(ptr) }
}

fn zeroed_block<T>() -> MmioBlock<T> {
    // SAFETY: every register block here is a plain `#[repr(C)]` struct of
    // `tock-registers` wrapper types, valid when zero-initialized.
    leaked_block(unsafe { std::mem::zeroed() })
}

/// Two `MmioBlock` handles aliasing the same leaked, zeroed register block,
/// so a test can hand one to [`Module::attach`] (which takes ownership) and
/// keep the other to poke hardware bits the same way a real ISR would.
fn aliased_zeroed_block<T>() -> (MmioBlock<T>, MmioBlock<T>) {
    let boxed: Box<T> = Box::new(unsafe { std::mem::zeroed() });
    let ptr = NonNull::new(Box::into_raw(boxed)).unwrap();
    // SAFETY: both handles point at the same leaked, zeroed block, which
    // outlives the test process; `RegisterBlock` methods only ever perform
    // volatile-style field accesses through it.
    unsafe { (MmioBlock::new(ptr), MmioBlock::new(ptr)) }
}

fn setup_module(num_procs: usize) -> Arc<Module> {
    let hal: Arc<dyn HalOps> = Arc::new(FakeHalOps::new());
    let firmware = Arc::new(FakeFirmwareLoader::new());
    let timer: Arc<dyn OsTimer> = Arc::new(FakeOsTimer::new());
    Module::setup(
        ModuleConfig { int_id: 7, num_procs, hib_enable: false, hib_timeout_ms: 0 },
        hal,
        firmware,
        timer,
        None,
    )
    .unwrap()
}

fn attach_params(boot_mode: BootMode, watchdog: Option<(MmioBlock<GptRegs>, u32)>) -> AttachParams {
    let ops: Arc<dyn RemoteCoreOps> = Arc::new(DspCore::new(
        zeroed_block::<MmuRegs>(),
        zeroed_block::<PrcmRegs>(),
        zeroed_block::<BootCfgRegs>(),
    ));
    let (watchdog_regs, watchdog_reload) = match watchdog {
        Some((regs, reload)) => (Some(regs), reload),
        None => (None, 0),
    };
    AttachParams {
        config: RemoteConfig { name: "dsp", mmu_enable: true, boot_mode, ..RemoteConfig::default() },
        ops,
        power_domain: PowerDomain::Dsp,
        mailbox_kind: RemoteKind::Dsp,
        mailbox_regs: zeroed_block::<MailboxRegs>(),
        watchdog_regs,
        watchdog_reload,
        phys: Arc::new(FakePhysMemory::new()),
        l1_phys_base: 0x9000_0000,
        l2_phys_base: 0x9100_0000,
        tx_ring_base: 0x9200_0000,
        rx_ring_base: 0x9300_0000,
    }
}

/// S1 — map + translate + unmap of a 1 MiB region.
#[test]
fn s1_map_translate_unmap_one_megabyte() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let module = setup_module(1);
    module.attach(0, attach_params(BootMode::NoLoadNoPwr, None)).unwrap();

    module.map(0, 0x8000_0000, 0x6000_0000, 0x0010_0000, MapAttrs::default()).unwrap();
    assert_eq!(module.translate(0, 0x6008_1234).unwrap(), 0x8008_1234);

    module.unmap(0, 0x6000_0000, 0x0010_0000).unwrap();
    assert_eq!(module.translate(0, 0x6008_1234).unwrap_err().kind(), ErrorKind::NotMapped);

    module.detach(0).unwrap();
    Module::destroy().unwrap();
}

/// S2 — mixed page sizes: a 0x0110_0000-byte mapping splits across section
/// and page granularities, and both ends of the range translate correctly.
#[test]
fn s2_mixed_page_sizes() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let module = setup_module(1);
    module.attach(0, attach_params(BootMode::NoLoadNoPwr, None)).unwrap();

    module.map(0, 0x8000_0000, 0x6000_0000, 0x0110_0000, MapAttrs::default()).unwrap();
    assert_eq!(module.translate(0, 0x6010_0000).unwrap(), 0x8010_0000);
    assert_eq!(module.translate(0, 0x60FF_F000).unwrap(), 0x80FF_F000);

    module.detach(0).unwrap();
    Module::destroy().unwrap();
}

/// S3 — name-service round trip between two independent MQCopy channels
/// sharing one fake physical arena (a loopback transport: one side's tx
/// ring lands exactly where the other's rx ring reads).
#[test]
fn s3_name_service_round_trip_and_notify_cancellation() {
    let arena: Arc<dyn PhysMemory> = Arc::new(FakePhysMemory::new());
    let host = MqCopyChannel::new(Arc::clone(&arena), 0x9000, 0xA000);
    let remote = MqCopyChannel::new(Arc::clone(&arena), 0xA000, 0x9000);

    let host_addr = host.create(None, Some("telemetry")).unwrap();
    assert!(host_addr > mqcopy::MAX_RESERVED);

    // announce() published descriptor 0 of host's tx ring, which is
    // remote's rx ring by construction.
    remote.handle_incoming(0).unwrap();

    let last_event: Arc<Mutex<Option<NotifyEvent>>> = Arc::new(Mutex::new(None));
    let created_count = Arc::new(AtomicU32::new(0));
    {
        let last_event = last_event.clone();
        let created_count = created_count.clone();
        host.register_notify(
            host_addr,
            Box::new(move |event| {
                if matches!(event, NotifyEvent::Created(_)) {
                    created_count.fetch_add(1, Ordering::SeqCst);
                }
                *last_event.lock().unwrap() = Some(event);
            }),
        )
        .unwrap();
    }

    let remote_addr = remote.create(None, Some("telemetry")).unwrap();
    host.handle_incoming(0).unwrap();
    assert_eq!(created_count.load(Ordering::SeqCst), 1);
    assert_eq!(*last_event.lock().unwrap(), Some(NotifyEvent::Created(remote_addr)));

    host.delete(host_addr).unwrap();
    assert_eq!(*last_event.lock().unwrap(), Some(NotifyEvent::Canceled));
}

/// S4 — suspend/resume preserves mappings: the mapping from S1 survives a
/// full suspend/resume cycle unchanged.
#[test]
fn s4_suspend_resume_preserves_mapping() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let module = setup_module(1);
    module.attach(0, attach_params(BootMode::Boot, None)).unwrap();
    module.start(0, 0x8000_0000).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Running);

    module.map(0, 0x8000_0000, 0x6000_0000, 0x0010_0000, MapAttrs::default()).unwrap();
    assert_eq!(module.translate(0, 0x6008_1234).unwrap(), 0x8008_1234);

    module.suspend(0).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Suspended);
    module.resume(0).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Running);

    assert_eq!(module.translate(0, 0x6008_1234).unwrap(), 0x8008_1234);

    module.stop(0).unwrap();
    module.detach(0).unwrap();
    Module::destroy().unwrap();
}

/// S5 — watchdog fire: a remote that never services its GP timer's
/// overflow interrupt is forced into `Watchdog` state the moment the ISR
/// glue calls back through [`Module::on_watchdog_overflow`].
#[test]
fn s5_watchdog_overflow_forces_watchdog_state() {
    let _guard = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let module = setup_module(1);
    let (attach_regs, test_regs) = aliased_zeroed_block::<GptRegs>();
    module.attach(0, attach_params(BootMode::Boot, Some((attach_regs, 10)))).unwrap();
    module.start(0, 0x8000_0000).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Running);

    // A spurious call before the timer has actually overflowed is a no-op.
    module.on_watchdog_overflow(0).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Running);

    // Simulate the GPT hardware overflowing: set the overflow-pending bit
    // the same way real hardware would, through an aliased handle onto the
    // identical register block `attach` wired into the watchdog.
    test_regs.IRQSTATUS.write(IRQ::OVF_IT_FLAG::SET);

    module.on_watchdog_overflow(0).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Watchdog);

    // The overflow bit was acknowledged by the first call; a second,
    // spurious call is idempotent.
    module.on_watchdog_overflow(0).unwrap();
    assert_eq!(module.get_state(0).unwrap(), ProcState::Watchdog);

    module.stop(0).unwrap();
    module.detach(0).unwrap();
    Module::destroy().unwrap();
}

/// S6 — send/receive with back-pressure: filling a ring's descriptors
/// exhausts it with `NoBuffer`, and draining one descriptor lets a retried
/// claim succeed.
#[test]
fn s6_ring_fill_then_backpressure_then_drain_recovers() {
    let mut vq: VirtQueue<4> = VirtQueue::new();
    vq.preseed(0x2000, 64);

    let mut claimed = Vec::new();
    for _ in 0..4 {
        claimed.push(vq.claim().unwrap());
    }
    assert_eq!(vq.claim().unwrap_err().kind(), ErrorKind::NoBuffer);

    vq.recycle(claimed[0]);
    assert!(vq.claim().is_ok());
}

/// S6, continued: the same back-pressure behavior observed through
/// [`MqCopyChannel::send`] against the full `NUM_BUFS`-sized tx ring.
#[test]
fn s6_channel_send_reports_no_buffer_once_tx_ring_is_full() {
    let phys: Arc<dyn PhysMemory> = Arc::new(FakePhysMemory::new());
    let channel = MqCopyChannel::new(phys, 0x1000_0000, 0x2000_0000);

    for _ in 0..vayu_remoteproc::virtqueue::NUM_BUFS {
        channel.send(0, 1, b"hello").unwrap();
    }
    let err = channel.send(0, 1, b"hello").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoBuffer);
}
