//! Random service shell.
//!
//! Serves entropy from the kernel source to the rest of the process
//! family over its request socket.

use super::{install_shutdown_signals, service_status};
use crate::logging;
use agentd_ipc::{EventLoop, IpcError, SocketContext, socket};
use agentd_wire::randomservice::{self, RandomCodecError};
use agentd_wire::status::{STATUS_SUCCESS, Service, error_status, ipc};
use slog::{Logger, info, warn};
use std::fs::File;
use std::io::Read;
use std::os::unix::io::RawFd;

/// The kernel entropy source.
const RANDOM_DEVICE: &str = "/dev/urandom";

struct RandomserviceState {
    source: File,
    log: Logger,
}

/// Runs the random service event loop on the given sockets.
pub fn event_loop(sock: RawFd, log_fd: RawFd) -> u32 {
    let log = logging::socket_logger(log_fd, 9);
    match run(sock, log) {
        Ok(status) => status,
        Err(status) => status,
    }
}

fn run(sock: RawFd, log: Logger) -> Result<u32, u32> {
    let source = File::open(RANDOM_DEVICE)
        .map_err(|_| error_status(Service::General, ipc::READ_FAILURE))?;

    socket::make_noblock(sock).map_err(|e| service_status(Service::General, &e))?;

    let mut event_loop: EventLoop<RandomserviceState> =
        EventLoop::new().map_err(|e| service_status(Service::General, &e))?;
    install_shutdown_signals(&event_loop, Service::General)?;

    event_loop
        .add_socket(SocketContext::new(sock), Some(Box::new(on_request)), None)
        .map_err(|e| service_status(Service::General, &e))?;

    info!(log, "randomservice ready");
    let mut state = RandomserviceState { source, log };
    event_loop
        .run(&mut state)
        .map_err(|e| service_status(Service::General, &e))
}

fn on_request(
    ctx: &mut SocketContext,
    state: &mut RandomserviceState,
    control: &mut agentd_ipc::LoopControl<RandomserviceState>,
) {
    if ctx.fill_input().is_err() {
        control.close_current();
        return;
    }
    loop {
        match ctx.read_data() {
            Ok(request) => {
                let response = match randomservice::decode_request(&request) {
                    Ok((offset, count)) => {
                        let mut bytes = vec![0u8; count as usize];
                        match state.source.read_exact(&mut bytes) {
                            Ok(()) => {
                                randomservice::encode_response(offset, STATUS_SUCCESS, &bytes)
                            }
                            Err(_) => randomservice::encode_response(
                                offset,
                                error_status(Service::General, ipc::READ_FAILURE),
                                &[],
                            ),
                        }
                    }
                    Err(RandomCodecError::InvalidCount(_)) => randomservice::encode_response(
                        0,
                        error_status(Service::General, ipc::UNEXPECTED_SIZE),
                        &[],
                    ),
                    Err(_) => randomservice::encode_response(
                        0,
                        error_status(Service::General, ipc::UNEXPECTED_TYPE),
                        &[],
                    ),
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
