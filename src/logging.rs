// Copyright The Vayu Remoteproc Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Structured logging plumbing.
//!
//! The crate never prints directly; every state transition, refcount
//! crossing, and ISR dispatch goes through the [`log`] facade. Hosts
//! embedding this crate are free to install any `log` backend of their own
//! (`env_logger`, a custom [`LogSink`], etc); [`init_from_env`] is a
//! dependency-free fallback for standalone binaries that haven't.

use core::fmt::{self, Arguments, Write};
use log::SetLoggerError;
use spin::mutex::SpinMutex;

/// Installs a minimal stderr logger at [`log::LevelFilter::Info`] if no
/// logger is installed yet. Library consumers embedding this crate in a
/// larger host should install their own `log` backend (e.g. `env_logger`,
/// which reads `RUST_LOG`) instead and skip this entirely.
pub fn init_from_env() -> Result<(), SetLoggerError> {
    env_logger_try_init()
}

#[cfg(not(test))]
fn env_logger_try_init() -> Result<(), SetLoggerError> {
    // Binaries that depend on this crate are expected to pull in a real
    // `log` backend (e.g. `env_logger`) themselves; this is a thin,
    // dependency-free fallback that just routes to stderr.
    log::set_logger(&STDERR_LOGGER).map(|()| log::set_max_level(log::LevelFilter::Info))
}

#[cfg(test)]
fn env_logger_try_init() -> Result<(), SetLoggerError> {
    Ok(())
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        eprintln!("{}: {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static STDERR_LOGGER: StderrLogger = StderrLogger;

/// Something to which formatted log lines can be sent.
///
/// Unlike [`core::fmt::Write`], `write_fmt` here takes `&self`: the
/// implementation owns whatever locking is required, or can be lock-free.
pub trait LogSink {
    /// Writes the given format arguments to the sink.
    fn write_fmt(&self, args: Arguments);
}

/// Wraps any [`Write`] implementation behind a spin mutex so it can be
/// shared as a [`LogSink`] from multiple threads, with whole log lines never
/// interleaved.
pub struct LockedWriter<W: Write> {
    writer: SpinMutex<W>,
}

impl<W: Write> LockedWriter<W> {
    /// Creates a new `LockedWriter` wrapping the given writer.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }
}

impl<W: Write> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        let _ = self.writer.lock().write_fmt(args);
    }
}

impl<W: Write> fmt::Debug for LockedWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct VecWriter(Arc<Mutex<String>>);

    impl Write for VecWriter {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.lock().unwrap().push_str(s);
            Ok(())
        }
    }

    #[test]
    fn locked_writer_collects_lines() {
        let buf = Arc::new(Mutex::new(String::new()));
        let sink = LockedWriter::new(VecWriter(buf.clone()));
        sink.write_fmt(format_args!("hello {}", 1));
        assert_eq!(*buf.lock().unwrap(), "hello 1");
    }
}
