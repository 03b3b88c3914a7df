//! Listen service shell.
//!
//! Accepts client connections on the configured listen sockets and
//! forwards each accepted descriptor to the protocol service over the
//! accept channel. The listen service itself never reads client bytes.

use super::{install_shutdown_signals, service_status};
use crate::logging;
use agentd_ipc::{EventLoop, SocketContext, fd_passing, socket};
use agentd_wire::status::Service;
use nix::errno::Errno;
use slog::{Logger, info, warn};
use std::os::unix::io::RawFd;

struct ListenserviceState {
    accept_fd: RawFd,
    log: Logger,
}

/// Runs the listen service event loop.
///
/// `listen_fds` are the bound, listening sockets handed over by the
/// supervisor at consecutive slots.
pub fn event_loop(log_fd: RawFd, accept_fd: RawFd, listen_fds: &[RawFd]) -> u32 {
    let log = logging::socket_logger(log_fd, 9);
    match run(accept_fd, listen_fds, log) {
        Ok(status) => status,
        Err(status) => status,
    }
}

fn run(accept_fd: RawFd, listen_fds: &[RawFd], log: Logger) -> Result<u32, u32> {
    let mut event_loop: EventLoop<ListenserviceState> =
        EventLoop::new().map_err(|e| service_status(Service::Listener, &e))?;
    install_shutdown_signals(&event_loop, Service::Listener)?;

    for &fd in listen_fds {
        socket::make_noblock(fd).map_err(|e| service_status(Service::Listener, &e))?;
        event_loop
            .add_socket(SocketContext::new(fd), Some(Box::new(on_incoming)), None)
            .map_err(|e| service_status(Service::Listener, &e))?;
    }

    info!(log, "listenservice ready on {} socket(s)", listen_fds.len());
    let mut state = ListenserviceState { accept_fd, log };
    event_loop
        .run(&mut state)
        .map_err(|e| service_status(Service::Listener, &e))
}

fn on_incoming(
    ctx: &mut SocketContext,
    state: &mut ListenserviceState,
    control: &mut agentd_ipc::LoopControl<ListenserviceState>,
) {
    loop {
        match nix::sys::socket::accept(ctx.fd()) {
            Ok(client) => {
                if fd_passing::send_descriptor(state.accept_fd, client).is_err() {
                    warn!(state.log, "protocol service is gone; stopping");
                    let _ = socket::close(client);
                    control.exit(agentd_wire::status::STATUS_SUCCESS);
                    return;
                }
                info!(state.log, "forwarded connection");
                let _ = socket::close(client);
            }
            Err(Errno::EAGAIN) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(state.log, "accept failed: {e}");
                control.close_current();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::IntoRawFd;

    #[test]
    fn forwards_accepted_connections() {
        agentd_ipc::signal::reset();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let listen_fd = listener.into_raw_fd();

        let (accept_tx, accept_rx) = socket::stream_pair().unwrap();
        let (log_w, log_r) = socket::stream_pair().unwrap();

        let handle = std::thread::spawn(move || event_loop(log_w, accept_tx, &[listen_fd]));

        // Connect; the forwarded descriptor arrives on the accept channel.
        let client = TcpStream::connect(addr).unwrap();
        let forwarded = fd_passing::recv_descriptor(accept_rx).unwrap();

        // Prove the forwarded socket reaches the client.
        nix::unistd::write(forwarded, b"hi").unwrap();
        let mut buf = [0u8; 2];
        use std::io::Read;
        let mut client = client;
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");

        // Closing the accept channel makes the next forward fail and the
        // service exit.
        socket::close(accept_rx).unwrap();
        socket::close(forwarded).unwrap();
        let _probe = TcpStream::connect(addr).unwrap();

        assert_eq!(handle.join().unwrap(), agentd_wire::status::STATUS_SUCCESS);
        socket::close(log_r).unwrap();
    }
}
