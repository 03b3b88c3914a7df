//! Structured logging.
//!
//! Each service logs through `slog`. Inside the process family the drain
//! writes framed `STRING` packets to the service's well-known log socket;
//! the supervisor collects the peer ends and relays lines to its own
//! stderr logger. Logging never fails a service: drain errors are
//! swallowed.

use agentd_ipc::blocking;
use slog::{Drain, Level, Logger, o};
use std::os::unix::io::RawFd;
use std::sync::Mutex;

/// Maps the configured 0–9 verbosity onto a slog level.
pub fn level_from_config(loglevel: u64) -> Level {
    match loglevel {
        0 => Level::Critical,
        1 => Level::Error,
        2 | 3 => Level::Warning,
        4 | 5 => Level::Info,
        6 | 7 => Level::Debug,
        _ => Level::Trace,
    }
}

struct LogSocketDrain {
    fd: RawFd,
}

impl Drain for LogSocketDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(
        &self,
        record: &slog::Record<'_>,
        _values: &slog::OwnedKVList,
    ) -> Result<Self::Ok, Self::Err> {
        let line = format!(
            "{} [{}] {}",
            record.level().as_short_str(),
            record.module(),
            record.msg()
        );
        let _ = blocking::write_string(self.fd, &line);
        Ok(())
    }
}

/// A logger whose drain writes framed lines to a log socket.
///
/// The descriptor stays owned by the caller; it must outlive the logger.
pub fn socket_logger(fd: RawFd, loglevel: u64) -> Logger {
    let drain = LogSocketDrain { fd }
        .filter_level(level_from_config(loglevel))
        .fuse();
    let drain = Mutex::new(drain).fuse();
    Logger::root(drain, o!())
}

/// A terminal logger on stderr, used during bootstrap before descriptor
/// remapping.
pub fn stderr_logger(loglevel: u64) -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(level_from_config(loglevel))
        .fuse();
    let drain = Mutex::new(drain).fuse();
    Logger::root(drain, o!())
}

/// A file logger. The supervisor uses this inside the chroot, where
/// descriptor 2 holds the PID file rather than a terminal.
pub fn file_logger(path: &str, loglevel: u64) -> Option<Logger> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()?;
    let decorator = slog_term::PlainSyncDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(level_from_config(loglevel))
        .fuse();
    let drain = Mutex::new(drain).fuse();
    Some(Logger::root(drain, o!()))
}

/// A logger that drops everything. Last resort when no log sink can be
/// opened.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
