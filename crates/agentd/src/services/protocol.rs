//! Protocol service shell.
//!
//! The client-facing frontend. Client descriptors arrive over the accept
//! channel from the listen service; every client session speaks the
//! protocol API inside authenticated frames. The key exchange itself is
//! the auth service's concern — this shell derives session suites from
//! the secret the supervisor installs over the control socket.
//!
//! Client requests are bridged onto the data service through a child
//! context holding only the read and submit capabilities.

use super::{install_shutdown_signals, service_status};
use crate::dataservice::{DataApiError, DataClient};
use crate::logging;
use agentd_ipc::authed::{self, ChaCha20Poly1305Suite};
use agentd_ipc::{EventLoop, IpcError, LoopControl, SocketContext, fd_passing, socket};
use agentd_wire::authservice::{self, InitializeRequest};
use agentd_wire::bitcap::BitCap;
use agentd_wire::dataservice::caps::ApiCap;
use agentd_wire::protocol::{ProtocolRequest, encode_response};
use agentd_wire::status::{
    STATUS_SUCCESS, Service, auth, error_status, protocol as reason,
};
use slog::{Logger, info, warn};
use std::collections::HashMap;
use std::os::unix::io::RawFd;

struct Session {
    suite: ChaCha20Poly1305Suite,
    iv_in: u64,
    iv_out: u64,
}

struct ProtocolState {
    data: DataClient,
    child: Option<u32>,
    secret: Option<[u8; 32]>,
    sessions: HashMap<RawFd, Session>,
    log: Logger,
}

/// Runs the protocol service event loop on the given sockets.
pub fn event_loop(accept_fd: RawFd, log_fd: RawFd, data_fd: RawFd, control_fd: RawFd) -> u32 {
    let log = logging::socket_logger(log_fd, 9);
    match run(accept_fd, data_fd, control_fd, log) {
        Ok(status) => status,
        Err(status) => status,
    }
}

fn run(accept_fd: RawFd, data_fd: RawFd, control_fd: RawFd, log: Logger) -> Result<u32, u32> {
    for fd in [accept_fd, control_fd] {
        socket::make_noblock(fd).map_err(|e| service_status(Service::Protocol, &e))?;
    }

    let mut event_loop: EventLoop<ProtocolState> =
        EventLoop::new().map_err(|e| service_status(Service::Protocol, &e))?;
    install_shutdown_signals(&event_loop, Service::Protocol)?;

    event_loop
        .add_socket(
            SocketContext::new(accept_fd),
            Some(Box::new(on_accept)),
            None,
        )
        .map_err(|e| service_status(Service::Protocol, &e))?;
    event_loop
        .add_socket(
            SocketContext::new(control_fd),
            Some(Box::new(on_control)),
            None,
        )
        .map_err(|e| service_status(Service::Protocol, &e))?;

    info!(log, "protocolservice ready");
    let mut state = ProtocolState {
        data: DataClient::new(data_fd),
        child: None,
        secret: None,
        sessions: HashMap::new(),
        log,
    };
    event_loop
        .run(&mut state)
        .map_err(|e| service_status(Service::Protocol, &e))
}

/// Control socket: the supervisor installs the agent identity before any
/// client traffic flows.
fn on_control(
    ctx: &mut SocketContext,
    state: &mut ProtocolState,
    control: &mut LoopControl<ProtocolState>,
) {
    if ctx.fill_input().is_err() {
        control.close_current();
        control.exit(STATUS_SUCCESS);
        return;
    }
    loop {
        match ctx.read_data() {
            Ok(request) => {
                let status = match InitializeRequest::decode(&request) {
                    Ok(init) if init.private_key.len() >= 32 => {
                        let mut secret = [0u8; 32];
                        secret.copy_from_slice(&init.private_key.as_slice()[..32]);
                        state.secret = Some(secret);
                        info!(state.log, "session secret installed");
                        STATUS_SUCCESS
                    }
                    Ok(_) => error_status(Service::Auth, auth::REQUEST_INVALID_SIZE),
                    Err(_) => error_status(Service::Auth, auth::REQUEST_BAD),
                };
                ctx.write_data(&authservice::encode_response(status));
            }
            Err(IpcError::WouldBlock) => break,
            Err(IpcError::ConnectionClosed) => {
                info!(state.log, "control socket closed; shutting down");
                control.close_current();
                control.exit(STATUS_SUCCESS);
                break;
            }
            Err(e) => {
                warn!(state.log, "control socket failed: {e}");
                control.close_current();
                control.exit(service_status(Service::Protocol, &e));
                break;
            }
        }
    }
    let _ = ctx.flush_output();
}

/// Accept channel: each message carries one client descriptor.
fn on_accept(
    ctx: &mut SocketContext,
    state: &mut ProtocolState,
    control: &mut LoopControl<ProtocolState>,
) {
    loop {
        match fd_passing::recv_descriptor(ctx.fd()) {
            Ok(client) => {
                let Some(secret) = state.secret else {
                    warn!(state.log, "client arrived before initialization; dropping");
                    let _ = socket::close(client);
                    continue;
                };
                if socket::make_noblock(client).is_err() {
                    let _ = socket::close(client);
                    continue;
                }
                state.sessions.insert(
                    client,
                    Session {
                        suite: ChaCha20Poly1305Suite::new(&secret),
                        iv_in: 0,
                        iv_out: 0,
                    },
                );
                info!(state.log, "client session opened");
                control.add_socket(
                    SocketContext::new(client),
                    Some(Box::new(on_client)),
                    None,
                );
            }
            Err(IpcError::WouldBlock) => break,
            Err(IpcError::ConnectionClosed) => {
                info!(state.log, "accept channel closed; shutting down");
                control.close_current();
                control.exit(STATUS_SUCCESS);
                break;
            }
            Err(e) => {
                warn!(state.log, "accept channel failed: {e}");
                control.close_current();
                control.exit(service_status(Service::Protocol, &e));
                break;
            }
        }
    }
}

/// A client session: authenticated request in, authenticated response
/// out. Any authentication failure drops the session.
fn on_client(
    ctx: &mut SocketContext,
    state: &mut ProtocolState,
    control: &mut LoopControl<ProtocolState>,
) {
    let fd = ctx.fd();
    if ctx.fill_input().is_err() {
        state.sessions.remove(&fd);
        control.close_current();
        return;
    }

    loop {
        let Some(session) = state.sessions.get_mut(&fd) else {
            control.close_current();
            return;
        };
        match authed::read_authed(ctx, &session.suite, &mut session.iv_in) {
            Ok(plaintext) => {
                let (response, close_after) = serve(state, plaintext.as_slice());
                // Re-borrow: serve needed the data client.
                let Some(session) = state.sessions.get_mut(&fd) else {
                    control.close_current();
                    return;
                };
                if authed::write_authed(ctx, &session.suite, &mut session.iv_out, &response)
                    .is_err()
                {
                    state.sessions.remove(&fd);
                    control.close_current();
                    return;
                }
                if close_after {
                    let _ = ctx.flush_output();
                    state.sessions.remove(&fd);
                    control.close_current();
                    return;
                }
            }
            Err(IpcError::WouldBlock) => break,
            Err(_) => {
                // EOF, MAC failure or nonce mismatch: drop the session.
                state.sessions.remove(&fd);
                control.close_current();
                return;
            }
        }
    }
    let _ = ctx.flush_output();
}

/// Decodes and executes one client request; returns the response payload
/// and whether the session closes afterward.
fn serve(state: &mut ProtocolState, plaintext: &[u8]) -> (Vec<u8>, bool) {
    use agentd_wire::protocol::ProtocolMethod;

    let (request, offset) = match ProtocolRequest::decode(plaintext) {
        Ok(decoded) => decoded,
        Err(_) => {
            return (
                encode_response(
                    ProtocolMethod::Close,
                    0,
                    error_status(Service::Protocol, reason::REQUEST_BAD),
                    &[],
                ),
                true,
            );
        }
    };
    let method = request.method();

    if matches!(request, ProtocolRequest::Close) {
        return (encode_response(method, offset, STATUS_SUCCESS, &[]), true);
    }

    let result = execute(state, &request);
    match result {
        Ok(body) => (encode_response(method, offset, STATUS_SUCCESS, &body), false),
        Err(DataApiError::Status(status)) => {
            (encode_response(method, offset, status, &[]), false)
        }
        Err(e) => {
            warn!(state.log, "data service bridge failed: {e}");
            (
                encode_response(
                    method,
                    offset,
                    error_status(Service::Protocol, reason::NOT_INITIALIZED),
                    &[],
                ),
                false,
            )
        }
    }
}

fn execute(state: &mut ProtocolState, request: &ProtocolRequest) -> Result<Vec<u8>, DataApiError> {
    let child = bridge_child(state)?;
    match request {
        ProtocolRequest::LatestBlockIdGet => {
            Ok(state.data.latest_block_id(child)?.to_vec())
        }
        ProtocolRequest::BlockIdByHeightGet { height } => {
            Ok(state.data.block_id_by_height(child, *height)?.to_vec())
        }
        ProtocolRequest::BlockGet { block_id } => {
            Ok(state.data.block_get(child, block_id)?.to_bytes())
        }
        ProtocolRequest::TransactionGet { txn_id } => {
            Ok(state.data.transaction_get(child, txn_id)?.to_bytes())
        }
        ProtocolRequest::TransactionSubmit {
            txn_id,
            artifact_id,
            cert,
        } => {
            state
                .data
                .transaction_submit(child, txn_id, artifact_id, cert)?;
            Ok(Vec::new())
        }
        ProtocolRequest::Close => Ok(Vec::new()),
    }
}

/// The bridge child context: read and submit only.
fn bridge_child(state: &mut ProtocolState) -> Result<u32, DataApiError> {
    if let Some(child) = state.child {
        return Ok(child);
    }

    let mut mask = BitCap::none();
    for cap in [
        ApiCap::ChildContextCreate,
        ApiCap::ChildContextClose,
        ApiCap::AppBlockIdLatestRead,
        ApiCap::AppBlockIdByHeightRead,
        ApiCap::AppBlockRead,
        ApiCap::AppTransactionRead,
        ApiCap::AppPqTransactionSubmit,
    ] {
        mask.set(cap);
    }
    let child = state.data.child_context_create(&mask)?;
    state.child = Some(child);
    Ok(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::data as dataservice_shell;
    use agentd_ipc::authed::{read_authed_block, write_authed_block};
    use agentd_ipc::blocking;
    use agentd_wire::mem::WipingBuf;
    use agentd_wire::protocol::{ProtocolMethod, decode_response};

    const SECRET: [u8; 32] = [0x42; 32];

    #[test]
    fn serves_authenticated_clients_end_to_end() {
        agentd_ipc::signal::reset();

        // Live data service.
        let (data_svc, data_peer) = socket::stream_pair().unwrap();
        let (data_log_w, _data_log_r) = socket::stream_pair().unwrap();
        let data_handle =
            std::thread::spawn(move || dataservice_shell::event_loop(data_svc, data_log_w, None));

        // The supervisor normally opens the root context before wiring
        // children.
        let setup = DataClient::new(data_peer);
        setup.root_context_init("data").unwrap();

        // Protocol service.
        let (accept_tx, accept_rx) = socket::stream_pair().unwrap();
        let (proto_log_w, _proto_log_r) = socket::stream_pair().unwrap();
        let (ctl_tx, ctl_rx) = socket::stream_pair().unwrap();
        let proto_handle =
            std::thread::spawn(move || event_loop(accept_rx, proto_log_w, data_peer, ctl_rx));

        // Install the session secret over the control socket.
        let init = InitializeRequest {
            agent_id: [1; 16],
            public_key: WipingBuf::from(&[0u8; 32][..]),
            private_key: WipingBuf::from(&SECRET[..]),
        };
        blocking::write_data(ctl_tx, &init.encode()).unwrap();
        let raw = blocking::read_data(ctl_tx).unwrap();
        assert_eq!(
            authservice::decode_response(&raw).unwrap(),
            STATUS_SUCCESS
        );

        // Hand a client connection over the accept channel.
        let (client, client_svc) = socket::stream_pair().unwrap();
        fd_passing::send_descriptor(accept_tx, client_svc).unwrap();
        socket::close(client_svc).unwrap();

        let suite = ChaCha20Poly1305Suite::new(&SECRET);
        let mut iv_out = 0u64;
        let mut iv_in = 0u64;

        // Submit a transaction through the authenticated channel.
        let submit = ProtocolRequest::TransactionSubmit {
            txn_id: [7; 16],
            artifact_id: [8; 16],
            cert: b"client-cert".to_vec(),
        };
        write_authed_block(client, &suite, &mut iv_out, &submit.encode(11)).unwrap();
        let resp = read_authed_block(client, &suite, &mut iv_in).unwrap();
        let (method, offset, status, body) = decode_response(resp.as_slice()).unwrap();
        assert_eq!(method, ProtocolMethod::TransactionSubmit);
        assert_eq!(offset, 11);
        assert_eq!(status, STATUS_SUCCESS);
        assert!(body.is_empty());

        // Read the transaction back.
        let get = ProtocolRequest::TransactionGet { txn_id: [7; 16] };
        write_authed_block(client, &suite, &mut iv_out, &get.encode(12)).unwrap();
        let resp = read_authed_block(client, &suite, &mut iv_in).unwrap();
        let (method, offset, status, body) = decode_response(resp.as_slice()).unwrap();
        assert_eq!(method, ProtocolMethod::TransactionGet);
        assert_eq!(offset, 12);
        assert_eq!(status, STATUS_SUCCESS);
        let txn =
            agentd_wire::dataservice::node::TransactionNode::from_bytes(body).unwrap();
        assert_eq!(txn.txn_id, [7; 16]);
        assert_eq!(txn.cert.as_slice(), b"client-cert");

        // Close the session cleanly.
        let close = ProtocolRequest::Close;
        write_authed_block(client, &suite, &mut iv_out, &close.encode(13)).unwrap();
        let resp = read_authed_block(client, &suite, &mut iv_in).unwrap();
        let (method, _, status, _) = decode_response(resp.as_slice()).unwrap();
        assert_eq!(method, ProtocolMethod::Close);
        assert_eq!(status, STATUS_SUCCESS);

        // The service closed its side.
        assert!(matches!(
            blocking::read_data(client),
            Err(IpcError::ConnectionClosed)
        ));

        // Tear the family down: closing the control socket stops the
        // protocol service; closing the data socket stops the data
        // service.
        socket::close(ctl_tx).unwrap();
        assert_eq!(proto_handle.join().unwrap(), STATUS_SUCCESS);
        socket::close(accept_tx).unwrap();
        socket::close(data_peer).unwrap();
        data_handle.join().unwrap();
        socket::close(client).unwrap();
    }

    #[test]
    fn tampered_client_frame_drops_session() {
        agentd_ipc::signal::reset();

        let (data_svc, data_peer) = socket::stream_pair().unwrap();
        let (data_log_w, _data_log_r) = socket::stream_pair().unwrap();
        let data_handle =
            std::thread::spawn(move || dataservice_shell::event_loop(data_svc, data_log_w, None));
        DataClient::new(data_peer).root_context_init("data").unwrap();

        let (accept_tx, accept_rx) = socket::stream_pair().unwrap();
        let (proto_log_w, _proto_log_r) = socket::stream_pair().unwrap();
        let (ctl_tx, ctl_rx) = socket::stream_pair().unwrap();
        let proto_handle =
            std::thread::spawn(move || event_loop(accept_rx, proto_log_w, data_peer, ctl_rx));

        let init = InitializeRequest {
            agent_id: [1; 16],
            public_key: WipingBuf::from(&[0u8; 32][..]),
            private_key: WipingBuf::from(&SECRET[..]),
        };
        blocking::write_data(ctl_tx, &init.encode()).unwrap();
        blocking::read_data(ctl_tx).unwrap();

        let (client, client_svc) = socket::stream_pair().unwrap();
        fd_passing::send_descriptor(accept_tx, client_svc).unwrap();
        socket::close(client_svc).unwrap();

        // A frame sealed under the wrong secret fails authentication and
        // the session drops.
        let wrong = ChaCha20Poly1305Suite::new(&[0xEE; 32]);
        let mut iv = 0u64;
        write_authed_block(
            client,
            &wrong,
            &mut iv,
            &ProtocolRequest::LatestBlockIdGet.encode(1),
        )
        .unwrap();
        assert!(matches!(
            blocking::read_data(client),
            Err(IpcError::ConnectionClosed)
        ));

        socket::close(ctl_tx).unwrap();
        proto_handle.join().unwrap();
        socket::close(accept_tx).unwrap();
        socket::close(data_peer).unwrap();
        data_handle.join().unwrap();
        socket::close(client).unwrap();
    }
}
