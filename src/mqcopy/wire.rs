// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! On-the-wire structures for the MQCopy channel and its reserved
//! name-service endpoint, per §6.

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Maximum payload bytes per message (`BUF_SIZE - header = 496 B`).
pub const MAX_PAYLOAD: usize = crate::virtqueue::BUF_SIZE - core::mem::size_of::<MqCopyHeader>();

/// Bit 0 of [`MqCopyHeader::flags`]: urgent delivery. Other bits reserved,
/// must be 0.
pub const FLAG_URGENT: u16 = 1 << 0;

/// The 16-byte, little-endian MQCopy wire header.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct MqCopyHeader {
    pub src: U32,
    pub dst: U32,
    pub reserved: U32,
    pub len: U16,
    pub flags: U16,
}

impl MqCopyHeader {
    /// Builds a header for a send of `len` bytes from `src` to `dst`.
    pub fn new(src: u32, dst: u32, len: u16, flags: u16) -> Self {
        Self {
            src: U32::new(src),
            dst: U32::new(dst),
            reserved: U32::new(0),
            len: U16::new(len),
            flags: U16::new(flags),
        }
    }
}

/// The reserved name-service endpoint address (§6, §3).
pub const NS_PORT: u32 = 53;
/// Sentinel endpoint address meaning "host, please assign one".
pub const ADDR_ANY: u32 = u32::MAX;
/// Name-service record flag: announce a new endpoint.
pub const NS_CREATE: u32 = 0;
/// Name-service record flag: an endpoint has gone away.
pub const NS_DESTROY: u32 = 1;
/// Maximum endpoint name length, NUL-padded on the wire.
pub const NS_NAME_LEN: usize = 32;

/// The 40-byte name-service record exchanged over [`NS_PORT`].
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
pub struct NsMessage {
    pub addr: U32,
    pub flags: U32,
    pub name: [u8; NS_NAME_LEN],
}

impl NsMessage {
    /// Builds a CREATE or DESTROY record for `addr`/`name`.
    pub fn new(addr: u32, destroy: bool, name: &str) -> Self {
        let mut bytes = [0u8; NS_NAME_LEN];
        let src = name.as_bytes();
        let n = src.len().min(NS_NAME_LEN - 1);
        bytes[..n].copy_from_slice(&src[..n]);
        Self {
            addr: U32::new(addr),
            flags: U32::new(if destroy { NS_DESTROY } else { NS_CREATE }),
            name: bytes,
        }
    }

    /// Returns the NUL-terminated name as a `&str`, lossily if it contains
    /// invalid UTF-8.
    pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn header_is_16_bytes() {
        assert_eq!(core::mem::size_of::<MqCopyHeader>(), 16);
    }

    #[test]
    fn ns_message_is_40_bytes() {
        assert_eq!(core::mem::size_of::<NsMessage>(), 40);
    }

    #[test]
    fn header_round_trips_little_endian() {
        let header = MqCopyHeader::new(1, 2, 10, FLAG_URGENT);
        let bytes = header.as_bytes();
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..14], &10u16.to_le_bytes());
    }

    #[test]
    fn ns_message_name_round_trips() {
        let msg = NsMessage::new(5, false, "telemetry");
        assert_eq!(msg.name_str(), "telemetry");
        assert_eq!(msg.flags.get(), NS_CREATE);
    }
}
