// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Crate-wide error type.

use std::fmt;
use thiserror::Error as ThisError;

/// The kind of failure reported by a fallible operation.
///
/// This is a closed taxonomy shared by every component; callers match on
/// `ErrorKind` rather than parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum ErrorKind {
    /// a caller passed a null, an out-of-range id, an unaligned size, or a
    /// wrong-typed argument
    #[error("invalid argument")]
    InvalidArg,
    /// the module isn't set up, or the operation isn't valid in the current
    /// state-machine state
    #[error("invalid state")]
    InvalidState,
    /// a named endpoint or remote id does not exist
    #[error("not found")]
    NotFound,
    /// a second `create`/`attach` was requested for the same id
    #[error("already exists")]
    AlreadyExists,
    /// host RAM or page-table L2 pool allocation failed
    #[error("out of memory")]
    NoMemory,
    /// the VirtQueue descriptor ring is empty in the requested direction
    #[error("no buffer available")]
    NoBuffer,
    /// the address table or TLB victim window is exhausted
    #[error("table full")]
    TableFull,
    /// the resource is held by another refcounted user, or the shared ISR
    /// slot is full
    #[error("busy")]
    Busy,
    /// a hardware status bit did not assert within the poll bound
    #[error("hardware timed out")]
    IoError,
    /// the feature is disabled by build config or hardware revision
    #[error("not supported")]
    NotSupported,
    /// synchronous teardown notification delivered to an observer
    #[error("canceled")]
    Canceled,
    /// `send` targeted an endpoint with no live transport
    #[error("no transport")]
    NoTransport,
    /// an `unmap` range only partially overlapped an existing mapping
    #[error("partial range")]
    PartialRange,
    /// `unmap`/`translate` found no mapping covering the address
    #[error("not mapped")]
    NotMapped,
    /// `map` would overlap an existing, non-identical mapping
    #[error("overlap")]
    Overlap,
    /// an address or size was not aligned to a supported page size
    #[error("invalid alignment")]
    InvalidAlign,
}

/// A crate-wide error: an [`ErrorKind`] plus optional static context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            Some(context) => write!(f, "{}: {context}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl Error {
    /// Creates a new error of the given kind with no context.
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Creates a new error of the given kind, attaching a static context
    /// message.
    pub const fn with_context(kind: ErrorKind, context: &'static str) -> Self {
        Self {
            kind,
            context: Some(context),
        }
    }

    /// Returns the kind of this error.
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Shorthand alias used throughout the crate's public API.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::with_context(ErrorKind::NoBuffer, "tx ring drained");
        assert_eq!(err.to_string(), "no buffer available: tx ring drained");
        assert_eq!(err.kind(), ErrorKind::NoBuffer);
    }

    #[test]
    fn from_kind_has_no_context() {
        let err: Error = ErrorKind::InvalidArg.into();
        assert_eq!(err.to_string(), "invalid argument");
    }
}
