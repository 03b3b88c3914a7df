//! Auth service shell.
//!
//! Holds the agent identity handed over by the supervisor at startup.
//! Peer session establishment lives behind this boundary and is not part
//! of the core; the shell accepts the initialize request and answers
//! status.

use super::{install_shutdown_signals, service_status};
use crate::logging;
use agentd_ipc::{EventLoop, IpcError, SocketContext, socket};
use agentd_wire::authservice::{self, InitializeRequest};
use agentd_wire::status::{Service, auth as reason, error_status};
use slog::{Logger, info, warn};
use std::os::unix::io::RawFd;

struct AuthserviceState {
    identity: Option<InitializeRequest>,
    log: Logger,
}

/// Runs the auth service event loop on the given sockets.
pub fn event_loop(sock: RawFd, log_fd: RawFd) -> u32 {
    let log = logging::socket_logger(log_fd, 9);
    match run(sock, log) {
        Ok(status) => status,
        Err(status) => status,
    }
}

fn run(sock: RawFd, log: Logger) -> Result<u32, u32> {
    socket::make_noblock(sock).map_err(|e| service_status(Service::Auth, &e))?;

    let mut event_loop: EventLoop<AuthserviceState> =
        EventLoop::new().map_err(|e| service_status(Service::Auth, &e))?;
    install_shutdown_signals(&event_loop, Service::Auth)?;

    event_loop
        .add_socket(SocketContext::new(sock), Some(Box::new(on_request)), None)
        .map_err(|e| service_status(Service::Auth, &e))?;

    info!(log, "authservice ready");
    let mut state = AuthserviceState {
        identity: None,
        log,
    };
    event_loop
        .run(&mut state)
        .map_err(|e| service_status(Service::Auth, &e))
}

fn on_request(
    ctx: &mut SocketContext,
    state: &mut AuthserviceState,
    control: &mut agentd_ipc::LoopControl<AuthserviceState>,
) {
    if ctx.fill_input().is_err() {
        control.close_current();
        return;
    }
    loop {
        match ctx.read_data() {
            Ok(request) => {
                let response = match InitializeRequest::decode(&request) {
                    Ok(init) => {
                        info!(state.log, "agent identity installed");
                        state.identity = Some(init);
                        authservice::encode_response(agentd_wire::status::STATUS_SUCCESS)
                    }
                    Err(_) => authservice::encode_response(error_status(
                        Service::Auth,
                        reason::REQUEST_BAD,
                    )),
                };
                ctx.write_data(&response);
            }
            Err(IpcError::WouldBlock) => break,
            Err(IpcError::ConnectionClosed) => {
                info!(state.log, "request socket closed; shutting down");
                control.close_current();
                break;
            }
            Err(e) => {
                warn!(state.log, "request socket failed: {e}");
                control.close_current();
                break;
            }
        }
    }
    let _ = ctx.flush_output();
}
