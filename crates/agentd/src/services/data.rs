//! Data service shell.
//!
//! Reads request packets off the well-known request socket, runs them
//! through the engine, and queues the responses. One request packet in,
//! one response packet out, strictly FIFO.

use super::{install_shutdown_signals, service_status};
use crate::dataservice::Engine;
use crate::logging;
use agentd_ipc::{EventLoop, IpcError, SocketContext, socket};
use agentd_wire::mem::wipe;
use agentd_wire::status::Service;
use slog::{Logger, debug, info, warn};
use std::os::unix::io::RawFd;

struct DataserviceState {
    engine: Engine,
    log: Logger,
}

/// Runs the data service event loop.
///
/// `sock` is the primary request socket; `extra_sock` is the secondary
/// request socket some deployments wire for the canonization side.
/// Returns the process exit status.
pub fn event_loop(sock: RawFd, log_fd: RawFd, extra_sock: Option<RawFd>) -> u32 {
    let log = logging::socket_logger(log_fd, 9);
    match run(sock, extra_sock, log) {
        Ok(status) => status,
        Err(status) => status,
    }
}

fn run(sock: RawFd, extra_sock: Option<RawFd>, log: Logger) -> Result<u32, u32> {
    let mut event_loop: EventLoop<DataserviceState> =
        EventLoop::new().map_err(|e| service_status(Service::Data, &e))?;
    install_shutdown_signals(&event_loop, Service::Data)?;

    for fd in std::iter::once(sock).chain(extra_sock) {
        socket::make_noblock(fd).map_err(|e| service_status(Service::Data, &e))?;
        event_loop
            .add_socket(SocketContext::new(fd), Some(Box::new(on_request)), None)
            .map_err(|e| service_status(Service::Data, &e))?;
    }

    info!(log, "dataservice ready");
    let mut state = DataserviceState {
        engine: Engine::with_memory_store(),
        log,
    };
    event_loop
        .run(&mut state)
        .map_err(|e| service_status(Service::Data, &e))
}

fn on_request(
    ctx: &mut SocketContext,
    state: &mut DataserviceState,
    control: &mut agentd_ipc::LoopControl<DataserviceState>,
) {
    if ctx.fill_input().is_err() {
        control.close_current();
        return;
    }
    loop {
        match ctx.read_data() {
            Ok(mut request) => {
                let response = state.engine.handle(&request);
                wipe(&mut request);
                ctx.write_data(&response);
                debug!(state.log, "request handled");
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
