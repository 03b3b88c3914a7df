//! Config reader.
//!
//! Runs inside the chroot with exactly two descriptors: the config file on
//! slot 0 and a socket back to the supervisor on slot 1. Parses the file
//! and ships the canonical framed form. Blocking I/O only; this runs
//! before any event loop exists.

use crate::config::{self, AgentConfig};
use agentd_wire::status::{STATUS_SUCCESS, Service, config as reason, error_status};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

/// Reads, parses and ships the configuration.
///
/// Returns the process exit status.
pub fn run(config_in: RawFd, config_out: RawFd) -> u32 {
    let text = match read_all(config_in) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => return error_status(Service::Config, reason::PARSE_FAILURE),
        },
        Err(_) => return error_status(Service::Config, reason::READ_FAILURE),
    };

    let parsed = match AgentConfig::from_toml(&text) {
        Ok(parsed) => parsed,
        Err(_) => return error_status(Service::Config, reason::PARSE_FAILURE),
    };

    match config::send(config_out, &parsed) {
        Ok(()) => STATUS_SUCCESS,
        Err(_) => error_status(Service::Config, reason::WRITE_FAILURE),
    }
}

fn read_all(fd: RawFd) -> Result<Vec<u8>, Errno> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match nix::unistd::read(fd, &mut chunk) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}
