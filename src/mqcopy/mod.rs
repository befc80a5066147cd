// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! MQCopy (C4 half two): a fixed-capacity endpoint registry and the
//! reserved name-service channel layered on top of the [`crate::virtqueue`]
//! split-ring, per §4.3 and §6.
//!
//! This module owns wire encode/decode and endpoint dispatch; it does not
//! know about mailboxes. The caller claims a descriptor via
//! [`MqCopyChannel::send`] and is responsible for kicking the remote (via
//! [`crate::mailbox::MailboxSubsystem`]); on the receive side, the caller
//! feeds completed descriptor indices into
//! [`MqCopyChannel::handle_incoming`] once the mailbox ISR reports them.

pub mod wire;

use crate::error::{Error, ErrorKind, Result};
use crate::hal::PhysMemory;
use crate::virtqueue::{VirtQueue, BUF_SIZE, NUM_BUFS};
use log::warn;
use spin::mutex::SpinMutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use wire::{MqCopyHeader, NsMessage, ADDR_ANY, MAX_PAYLOAD, NS_PORT};
use zerocopy::{FromBytes, IntoBytes};

/// Upper bound on simultaneously registered endpoints (host + remote
/// combined view), per §3.
pub const MAX_ENDPOINTS: usize = 32;
/// Addresses below this are reserved for well-known services; dynamic
/// assignment starts here.
pub const MAX_RESERVED: u32 = 16;

type DeliveryCallback = Box<dyn Fn(u32, &[u8]) + Send + Sync>;

/// An event delivered to a [`MqCopyChannel::register_notify`] observer.
///
/// `Canceled` mirrors [`crate::error::ErrorKind::Canceled`] (§5: "delete
/// cancels any in-flight register_notify observers synchronously... before
/// freeing the slot") — delivered through the callback itself rather than a
/// `Result`, since it isn't the outcome of any call the observer made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    /// A same-named remote endpoint announced itself at `addr`.
    Created(u32),
    /// A same-named remote endpoint at `addr` went away.
    Destroyed(u32),
    /// The endpoint this observer was registered on was deleted.
    Canceled,
}

type ObserverCallback = Box<dyn Fn(NotifyEvent) + Send + Sync>;

struct Endpoint {
    addr: u32,
    name: Option<String>,
    delivery: SpinMutex<Option<DeliveryCallback>>,
    observer: SpinMutex<Option<ObserverCallback>>,
}

/// One MQCopy channel bound to a single remote processor: a tx ring, an rx
/// ring, and the endpoint table multiplexed over them.
pub struct MqCopyChannel {
    phys: Arc<dyn PhysMemory>,
    tx: SpinMutex<VirtQueue<NUM_BUFS>>,
    rx: SpinMutex<VirtQueue<NUM_BUFS>>,
    endpoints: SpinMutex<Vec<Endpoint>>,
    next_dynamic: AtomicU32,
}

impl MqCopyChannel {
    /// Creates a channel with preseeded tx/rx rings at the given buffer
    /// base addresses, and registers the reserved name-service endpoint.
    pub fn new(phys: Arc<dyn PhysMemory>, tx_base: u32, rx_base: u32) -> Self {
        let mut tx = VirtQueue::new();
        tx.preseed(tx_base, BUF_SIZE as u32);
        let mut rx = VirtQueue::new();
        rx.preseed(rx_base, BUF_SIZE as u32);

        let channel = Self {
            phys,
            tx: SpinMutex::new(tx),
            rx: SpinMutex::new(rx),
            endpoints: SpinMutex::new(Vec::with_capacity(MAX_ENDPOINTS)),
            next_dynamic: AtomicU32::new(MAX_RESERVED + 1),
        };
        channel.endpoints.lock().push(Endpoint {
            addr: NS_PORT,
            name: None,
            delivery: SpinMutex::new(None),
            observer: SpinMutex::new(None),
        });
        channel
    }

    fn find(endpoints: &[Endpoint], addr: u32) -> Option<usize> {
        endpoints.iter().position(|e| e.addr == addr)
    }

    /// Registers a new endpoint at `requested` (or assigns the next free
    /// dynamic address if `requested` is [`wire::ADDR_ANY`] or `None`), and
    /// announces it over the name service if `name` is given.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] if the address is taken, or
    /// [`ErrorKind::TableFull`] once [`MAX_ENDPOINTS`] is reached.
    pub fn create(&self, requested: Option<u32>, name: Option<&str>) -> Result<u32> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.len() >= MAX_ENDPOINTS {
            return Err(Error::new(ErrorKind::TableFull));
        }

        let addr = match requested {
            Some(addr) if addr != ADDR_ANY => {
                if Self::find(&endpoints, addr).is_some() {
                    return Err(Error::new(ErrorKind::AlreadyExists));
                }
                addr
            }
            _ => {
                let mut candidate = self.next_dynamic.fetch_add(1, Ordering::Relaxed);
                while Self::find(&endpoints, candidate).is_some() {
                    candidate = self.next_dynamic.fetch_add(1, Ordering::Relaxed);
                }
                candidate
            }
        };

        endpoints.push(Endpoint {
            addr,
            name: name.map(str::to_owned),
            delivery: SpinMutex::new(None),
            observer: SpinMutex::new(None),
        });
        drop(endpoints);

        if let Some(name) = name {
            self.announce(addr, name, false)?;
        }
        Ok(addr)
    }

    /// Unregisters `addr`, canceling any observer registered on it (§5:
    /// synchronously invoked with [`NotifyEvent::Canceled`] before the slot
    /// is freed), notifying every other local endpoint watching its name
    /// with [`NotifyEvent::Destroyed`], and announcing its departure over
    /// the name service if it was created with a name.
    pub fn delete(&self, addr: u32) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        let idx = Self::find(&endpoints, addr).ok_or(Error::new(ErrorKind::NotFound))?;
        let endpoint = endpoints.remove(idx);
        drop(endpoints);

        if let Some(cb) = endpoint.observer.lock().take() {
            cb(NotifyEvent::Canceled);
        }
        if let Some(name) = &endpoint.name {
            self.notify_observers(name, addr, false);
            self.announce(addr, name, true)?;
        }
        Ok(())
    }

    /// Installs the message-delivery callback for `addr`, invoked by
    /// [`MqCopyChannel::handle_incoming`] with `(src, payload)` for frames
    /// addressed to it.
    pub fn set_delivery_callback(&self, addr: u32, callback: DeliveryCallback) -> Result<()> {
        let endpoints = self.endpoints.lock();
        let idx = Self::find(&endpoints, addr).ok_or(Error::new(ErrorKind::NotFound))?;
        *endpoints[idx].delivery.lock() = Some(callback);
        Ok(())
    }

    /// Subscribes `addr`'s owner to CREATE/DESTROY announcements of other
    /// endpoints sharing its name (§4.3), replaying [`NotifyEvent::Created`]
    /// immediately for every already-known match.
    ///
    /// Fails with [`ErrorKind::NotFound`] if `addr` isn't registered, or
    /// [`ErrorKind::InvalidArg`] if it was created without a name (there is
    /// nothing to match against).
    pub fn register_notify(&self, addr: u32, callback: ObserverCallback) -> Result<()> {
        let endpoints = self.endpoints.lock();
        let idx = Self::find(&endpoints, addr).ok_or(Error::new(ErrorKind::NotFound))?;
        let name = endpoints[idx]
            .name
            .clone()
            .ok_or(Error::with_context(ErrorKind::InvalidArg, "endpoint has no name to match"))?;

        let matches: Vec<u32> = endpoints
            .iter()
            .filter(|e| e.addr != addr && e.name.as_deref() == Some(name.as_str()))
            .map(|e| e.addr)
            .collect();
        for other_addr in matches {
            callback(NotifyEvent::Created(other_addr));
        }
        *endpoints[idx].observer.lock() = Some(callback);
        Ok(())
    }

    fn announce(&self, addr: u32, name: &str, destroy: bool) -> Result<()> {
        let record = NsMessage::new(addr, destroy, name);
        self.send(NS_PORT, NS_PORT, record.as_bytes())?;
        Ok(())
    }

    /// Claims a tx descriptor, writes the wire header and `payload` into
    /// its buffer, and publishes it to the used ring. Returns the
    /// descriptor index so the caller can kick the remote's mailbox.
    ///
    /// Fails with [`ErrorKind::InvalidArg`] if `payload` exceeds
    /// [`wire::MAX_PAYLOAD`], or [`ErrorKind::NoBuffer`] if the tx ring is
    /// drained.
    pub fn send(&self, src: u32, dst: u32, payload: &[u8]) -> Result<u16> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::with_context(ErrorKind::InvalidArg, "payload exceeds MAX_PAYLOAD"));
        }

        let mut tx = self.tx.lock();
        let index = tx.claim()?;
        let descriptor = tx.descriptor(index);

        let header = MqCopyHeader::new(src, dst, payload.len() as u16, 0);
        let mut frame = Vec::with_capacity(core::mem::size_of::<MqCopyHeader>() + payload.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(payload);

        // SAFETY: `descriptor.addr`/`descriptor.len` name one of this
        // ring's preseeded buffers, owned exclusively by the caller for the
        // duration of this call because the ring lock is held.
        unsafe {
            let ptr = self.phys.map(descriptor.addr as u64, descriptor.len as usize)?;
            core::ptr::copy_nonoverlapping(frame.as_ptr(), ptr.as_ptr(), frame.len());
            self.phys.unmap(ptr, descriptor.len as usize);
        }

        tx.publish_used(index, frame.len() as u32);
        Ok(index)
    }

    /// Reads the completed rx descriptor at `index`, dispatches it to the
    /// matching endpoint (or the name-service handler for
    /// [`wire::NS_PORT`]), and recycles the descriptor.
    pub fn handle_incoming(&self, index: u16) -> Result<()> {
        let descriptor = {
            let rx = self.rx.lock();
            rx.descriptor(index)
        };

        let mut buf = vec![0u8; descriptor.len as usize];
        // SAFETY: see `send`; the descriptor names a buffer this channel
        // owns exclusively while dispatching it.
        unsafe {
            let ptr = self.phys.map(descriptor.addr as u64, descriptor.len as usize)?;
            core::ptr::copy_nonoverlapping(ptr.as_ptr(), buf.as_mut_ptr(), buf.len());
            self.phys.unmap(ptr, descriptor.len as usize);
        }

        let (header, payload) = MqCopyHeader::ref_from_prefix(&buf)
            .map_err(|_| Error::with_context(ErrorKind::InvalidArg, "short MQCopy frame"))?;
        let len = header.len.get() as usize;
        let payload = payload.get(..len).ok_or(Error::with_context(ErrorKind::InvalidArg, "truncated frame"))?;

        if header.dst.get() == NS_PORT {
            self.handle_ns_message(payload)?;
        } else {
            let endpoints = self.endpoints.lock();
            match Self::find(&endpoints, header.dst.get()) {
                Some(idx) => {
                    if let Some(cb) = endpoints[idx].delivery.lock().as_ref() {
                        cb(header.src.get(), payload);
                    }
                }
                None => warn!("mqcopy: no endpoint for dst={}", header.dst.get()),
            }
        }

        self.rx.lock().recycle(index);
        Ok(())
    }

    /// Dispatches to every local endpoint (other than `addr` itself) whose
    /// name matches and has an observer registered via
    /// [`MqCopyChannel::register_notify`].
    fn notify_observers(&self, name: &str, addr: u32, created: bool) {
        let endpoints = self.endpoints.lock();
        for endpoint in endpoints.iter() {
            if endpoint.addr == addr || endpoint.name.as_deref() != Some(name) {
                continue;
            }
            if let Some(cb) = endpoint.observer.lock().as_ref() {
                cb(if created {
                    NotifyEvent::Created(addr)
                } else {
                    NotifyEvent::Destroyed(addr)
                });
            }
        }
    }

    fn handle_ns_message(&self, payload: &[u8]) -> Result<()> {
        let ns = NsMessage::ref_from_bytes(payload)
            .map_err(|_| Error::with_context(ErrorKind::InvalidArg, "malformed NS record"))?;
        let name = ns.name_str().into_owned();
        let remote_addr = ns.addr.get();
        if ns.flags.get() == wire::NS_DESTROY {
            let removed = {
                let mut endpoints = self.endpoints.lock();
                Self::find(&endpoints, remote_addr).map(|idx| endpoints.remove(idx))
            };
            if removed.is_some() {
                self.notify_observers(&name, remote_addr, false);
            }
        } else {
            let inserted = {
                let mut endpoints = self.endpoints.lock();
                if Self::find(&endpoints, remote_addr).is_none() && endpoints.len() < MAX_ENDPOINTS {
                    endpoints.push(Endpoint {
                        addr: remote_addr,
                        name: Some(name.clone()),
                        delivery: SpinMutex::new(None),
                        observer: SpinMutex::new(None),
                    });
                    true
                } else {
                    false
                }
            };
            if inserted {
                self.notify_observers(&name, remote_addr, true);
            }
        }
        Ok(())
    }

    /// Returns the descriptor the rx ring would next recycle to, for tests
    /// that simulate a remote "delivering" a frame without a real mailbox.
    pub fn rx_descriptor(&self, index: u16) -> crate::virtqueue::Descriptor {
        self.rx.lock().descriptor(index)
    }
}
