//! Service shells.
//!
//! Each service is a thin wrapper around the event loop: install the
//! shutdown signals, register the inbound sockets in non-blocking mode
//! with method-dispatch callbacks, run the loop, exit with its status.
//! Transport failures during setup are namespaced under the owning
//! service's identifier so the supervisor can tell which child failed
//! and why.

pub mod auth;
pub mod canonization;
pub mod data;
pub mod listen;
pub mod protocol;
pub mod random;
pub mod readconfig;

use agentd_ipc::{EventLoop, IpcError};
use agentd_wire::status::{Service, error_status};

/// Namespaces a transport failure under a service identifier.
pub(crate) fn service_status(service: Service, e: &IpcError) -> u32 {
    error_status(service, e.reason_code())
}

/// Installs the uniform shutdown signals: HUP, TERM, QUIT.
pub(crate) fn install_shutdown_signals<S>(
    event_loop: &EventLoop<S>,
    service: Service,
) -> Result<(), u32> {
    for sig in [libc::SIGHUP, libc::SIGTERM, libc::SIGQUIT] {
        event_loop
            .exit_on_signal(sig)
            .map_err(|e| service_status(service, &e))?;
    }
    Ok(())
}
