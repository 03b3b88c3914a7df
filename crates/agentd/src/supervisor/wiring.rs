//! Private supervisor sub-command.
//!
//! Runs chrooted at the prefix with the locked PID file at its well-known
//! slot. Reads the configuration through the readconfig child, creates
//! every socket pair, forks the service family with remapped descriptor
//! tables and dropped privileges, performs the startup requests (root
//! context, identities, canonization control), then supervises: log lines
//! are relayed to stderr and the first child exit or shutdown signal
//! tears the family down.

use crate::bootstrap::DEFAULT_CONFIG_FILE;
use crate::config::{self, AgentConfig};
use crate::dataservice::{DataApiError, DataClient};
use crate::fds;
use crate::logging;
use crate::privsep;
use crate::process::{Process, ProcessError, Starter};
use agentd_ipc::{EventLoop, IpcError, SocketContext, blocking, socket};
use agentd_wire::authservice::InitializeRequest;
use agentd_wire::bitcap::BitCap;
use agentd_wire::canonization::{ControlRequest, decode_response as decode_control_response};
use agentd_wire::dataservice::caps::ApiCap;
use agentd_wire::dataservice::GLOBAL_SETTING_ROOT_BLOCK;
use agentd_wire::mem::WipingBuf;
use agentd_wire::randomservice;
use agentd_wire::status::{
    STATUS_SUCCESS, Service, data, error_status, general, ipc, is_error,
};
use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use nix::unistd::{ForkResult, Gid, Uid, fork};
use slog::{Logger, error, info, warn};
use std::net::TcpListener;
use std::os::unix::io::{IntoRawFd, RawFd};

struct Family {
    services: Vec<Process>,
    /// (service name, parent end of its log socket)
    log_taps: Vec<(&'static str, RawFd)>,
    /// Kept open for the family's lifetime; dropping them shuts the
    /// owning service down.
    held_fds: Vec<RawFd>,
}

struct SupervisorState {
    log: Logger,
}

/// Entry point for `agentd -P supervisor`.
///
/// Descriptor 2 is the PID file here, so logging goes to the log file
/// inside the chroot, never to stderr.
pub fn private_command_supervisor() -> u32 {
    let boot_log = supervisor_logger("log", 4);
    let config = load_config(&boot_log);
    let log = supervisor_logger(&config.logdir, config.loglevel);

    // The config may name a tighter filesystem root inside the prefix.
    // Entering it happens after readconfig, which needed the prefix view.
    if let Some(dir) = &config.chroot_dir
        && let Err(e) = privsep::chroot(dir)
    {
        error!(log, "chroot into {dir} failed: {e}");
        return e.status_code();
    }

    let mut family = match wire(&log, &config) {
        Ok(family) => family,
        Err(status) => {
            error!(log, "supervisor wiring failed: 0x{status:08x}");
            return status;
        }
    };

    let status = supervise(&log, &mut family);

    info!(log, "stopping service family");
    for service in family.services.iter_mut().rev() {
        match service.stop() {
            Ok(()) => info!(log, "{} stopped", service.name()),
            Err(ProcessError::NotActive) => {}
            Err(e) => warn!(log, "{} did not stop cleanly: {e}", service.name()),
        }
    }
    for fd in family.held_fds.drain(..) {
        let _ = socket::close(fd);
    }
    status
}

fn supervisor_logger(logdir: &str, loglevel: u64) -> Logger {
    let path = crate::strings::concat_all(&["/", logdir, "/agentd.log"]);
    logging::file_logger(&path, loglevel).unwrap_or_else(logging::discard_logger)
}

/// Reads the configuration through the readconfig child; falls back to
/// defaults when the config file is absent.
fn load_config(log: &Logger) -> AgentConfig {
    let config_fd = match open(DEFAULT_CONFIG_FILE, OFlag::O_RDONLY, Mode::empty()) {
        Ok(fd) => fd,
        Err(_) => {
            warn!(log, "no config at {DEFAULT_CONFIG_FILE}; using defaults");
            return AgentConfig::default();
        }
    };

    let parsed = spawn_readconfig(config_fd);
    let _ = nix::unistd::close(config_fd);
    match parsed {
        Ok(parsed) => parsed,
        Err(status) => {
            warn!(log, "readconfig failed (0x{status:08x}); using defaults");
            AgentConfig::default()
        }
    }
}

fn spawn_readconfig(config_fd: RawFd) -> Result<AgentConfig, u32> {
    let (parent_end, child_end) = socket::stream_pair().map_err(|e| e.status_code())?;

    let mut readconfig = Process::new(
        "readconfig",
        service_starter(
            "readconfig",
            vec![(config_fd, fds::CONFIG_IN), (child_end, fds::CONFIG_OUT)],
            None,
        ),
    );
    readconfig.start().map_err(|e| e.status_code())?;
    let _ = socket::close(child_end);

    let parsed = config::recv(parent_end)
        .map_err(|_| error_status(Service::Config, agentd_wire::status::config::PARSE_FAILURE));
    let _ = socket::close(parent_end);
    let _ = readconfig.stop();
    parsed
}

/// Creates the socket fabric and forks every service.
fn wire(log: &Logger, config: &AgentConfig) -> Result<Family, u32> {
    let identity = match &config.usergroup {
        Some(ug) => Some(
            privsep::lookup_usergroup(&ug.user, &ug.group).map_err(|e| e.status_code())?,
        ),
        None => None,
    };

    let pair = || socket::stream_pair().map_err(|e| e.status_code());

    // Log channels, child end first.
    let (rand_log_c, rand_log_p) = pair()?;
    let (data_log_c, data_log_p) = pair()?;
    let (auth_log_c, auth_log_p) = pair()?;
    let (canon_log_c, canon_log_p) = pair()?;
    let (proto_log_c, proto_log_p) = pair()?;
    let (listen_log_c, listen_log_p) = pair()?;

    // Request and control channels.
    let (rand_svc, rand_sock) = pair()?;
    let (data_proto_svc, data_proto) = pair()?;
    let (data_canon_svc, data_canon) = pair()?;
    let (auth_svc, auth_sock) = pair()?;
    let (canon_ctl_svc, canon_ctl) = pair()?;
    let (proto_ctl_svc, proto_ctl) = pair()?;
    // Accepted client descriptors flow listen -> protocol.
    let (proto_accept, listen_accept) = pair()?;

    let listen_fds = bind_listen_sockets(log, config)?;

    let mut services = Vec::new();

    services.push(spawned(
        "randomservice",
        vec![
            (rand_svc, fds::RANDOMSERVICE_SOCK),
            (rand_log_c, fds::RANDOMSERVICE_LOG),
        ],
        identity,
    )?);

    services.push(spawned(
        "dataservice",
        vec![
            (data_proto_svc, fds::DATASERVICE_SOCK),
            (data_log_c, fds::DATASERVICE_LOG),
            (data_canon_svc, fds::DATASERVICE_SOCK_SECONDARY),
        ],
        identity,
    )?);

    // The root context must exist before any consumer starts.
    DataClient::new(data_proto)
        .root_context_init(&config.datadir)
        .map_err(|_| error_status(Service::Data, data::NO_ROOT_CONTEXT))?;
    info!(log, "root context open on {}", config.datadir);

    if let Some(path) = &config.rootblock_file {
        seed_root_block(log, data_proto, path)?;
    }

    // Identity material: configured secret or fresh entropy.
    let secret = load_secret(config, rand_sock)?;
    let agent_id = random_bytes(rand_sock, 16)?;
    if agent_id.len() != 16 {
        return Err(error_status(Service::General, ipc::UNEXPECTED_SIZE));
    }
    let mut id = [0u8; 16];
    id.copy_from_slice(&agent_id);
    let init = InitializeRequest {
        agent_id: id,
        public_key: WipingBuf::default(),
        private_key: WipingBuf::new(secret),
    };

    services.push(spawned(
        "authservice",
        vec![
            (auth_svc, fds::AUTHSERVICE_SOCK),
            (auth_log_c, fds::AUTHSERVICE_LOG),
        ],
        identity,
    )?);
    send_initialize(auth_sock, &init)?;

    services.push(spawned(
        "canonizationservice",
        vec![
            (data_canon, fds::CANONIZATION_DATA),
            (canon_log_c, fds::CANONIZATION_LOG),
            (canon_ctl_svc, fds::CANONIZATION_CONTROL),
        ],
        identity,
    )?);
    start_canonization(canon_ctl, config)?;

    services.push(spawned(
        "unauthorized_protocol_service",
        vec![
            (proto_accept, fds::PROTOCOLSERVICE_ACCEPT),
            (proto_log_c, fds::PROTOCOLSERVICE_LOG),
            (data_proto, fds::PROTOCOLSERVICE_DATA),
            (proto_ctl_svc, fds::PROTOCOLSERVICE_CONTROL),
        ],
        identity,
    )?);
    send_initialize(proto_ctl, &init)?;

    let mut listen_map = vec![
        (listen_log_c, fds::LISTENSERVICE_LOG),
        (listen_accept, fds::LISTENSERVICE_ACCEPT),
    ];
    for (i, &fd) in listen_fds.iter().enumerate() {
        listen_map.push((fd, fds::LISTENSERVICE_SOCK_START + i as RawFd));
    }
    services.push(spawned("listenservice", listen_map, identity)?);

    // Close the child ends we still hold; the children own them now.
    for fd in [
        rand_log_c,
        data_log_c,
        auth_log_c,
        canon_log_c,
        proto_log_c,
        listen_log_c,
        rand_svc,
        data_proto_svc,
        data_canon_svc,
        auth_svc,
        canon_ctl_svc,
        proto_ctl_svc,
        proto_accept,
        listen_accept,
        data_proto,
        data_canon,
    ]
    .into_iter()
    .chain(listen_fds)
    {
        let _ = socket::close(fd);
    }

    info!(log, "service family is up");
    Ok(Family {
        services,
        log_taps: vec![
            ("randomservice", rand_log_p),
            ("dataservice", data_log_p),
            ("authservice", auth_log_p),
            ("canonizationservice", canon_log_p),
            ("protocolservice", proto_log_p),
            ("listenservice", listen_log_p),
        ],
        held_fds: vec![rand_sock, auth_sock, canon_ctl, proto_ctl],
    })
}

/// Relays child log lines and waits for a shutdown signal or a child
/// exit.
fn supervise(log: &Logger, family: &mut Family) -> u32 {
    let mut event_loop: EventLoop<SupervisorState> = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => return e.status_code(),
    };

    for sig in [libc::SIGHUP, libc::SIGTERM, libc::SIGQUIT, libc::SIGCHLD] {
        if event_loop.exit_on_signal(sig).is_err() {
            return error_status(Service::Supervisor, ipc::SIGNAL_INSTALL_FAILURE);
        }
    }

    for (name, fd) in family.log_taps.drain(..) {
        if socket::make_noblock(fd).is_err() {
            continue;
        }
        let tap = move |ctx: &mut SocketContext,
                        state: &mut SupervisorState,
                        control: &mut agentd_ipc::LoopControl<SupervisorState>| {
            if ctx.fill_input().is_err() {
                control.close_current();
                return;
            }
            loop {
                match ctx.read_string() {
                    Ok(line) => info!(state.log, "[{name}] {line}"),
                    Err(IpcError::WouldBlock) => break,
                    Err(_) => {
                        control.close_current();
                        break;
                    }
                }
            }
        };
        if event_loop
            .add_socket(SocketContext::new(fd), Some(Box::new(tap)), None)
            .is_err()
        {
            return error_status(Service::Supervisor, ipc::EVENT_LOOP_ADD_FAILURE);
        }
    }

    let mut state = SupervisorState { log: log.clone() };
    match event_loop.run(&mut state) {
        Ok(status) => status,
        Err(e) => e.status_code(),
    }
}

fn spawned(
    sub: &'static str,
    fd_map: Vec<(RawFd, RawFd)>,
    identity: Option<(Uid, Gid)>,
) -> Result<Process, u32> {
    let mut process = Process::new(sub, service_starter(sub, fd_map, identity));
    process.start().map_err(|e| e.status_code())?;
    Ok(process)
}

/// Builds a starter that forks and execs `agentd -P <sub>` with the given
/// descriptor table and identity.
fn service_starter(
    sub: &'static str,
    fd_map: Vec<(RawFd, RawFd)>,
    identity: Option<(Uid, Gid)>,
) -> Starter {
    Box::new(move || {
        // The child branch runs only exec-bound privsep setup.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child),
            Ok(ForkResult::Child) => {
                let status = exec_service(sub, &fd_map, identity);
                // Only reached when setup or exec failed.
                std::process::exit(status as i32);
            }
            Err(_) => Err(ProcessError::StartFailed(error_status(
                Service::General,
                general::FORK_FAILURE,
            ))),
        }
    })
}

/// Child-side setup: park the kept descriptors high, remap them onto the
/// well-known slots, close everything else, drop privileges, exec.
fn exec_service(sub: &str, fd_map: &[(RawFd, RawFd)], identity: Option<(Uid, Gid)>) -> u32 {
    let mut sources: Vec<RawFd> = fd_map.iter().map(|&(curr, _)| curr).collect();
    {
        let mut refs: Vec<&mut RawFd> = sources.iter_mut().collect();
        if let Err(e) = privsep::protect_descriptors(&mut refs) {
            return e.status_code();
        }
    }

    let remap: Vec<(RawFd, RawFd)> = sources
        .iter()
        .zip(fd_map.iter())
        .map(|(&parked, &(_, mapped))| (parked, mapped))
        .collect();
    if let Err(e) = privsep::setfds(&remap) {
        return e.status_code();
    }

    let highest_slot = fd_map.iter().map(|&(_, mapped)| mapped).max().unwrap_or(2);
    privsep::close_other_fds(highest_slot);

    if let Some((uid, gid)) = identity
        && let Err(e) = privsep::drop_privileges(uid, gid)
    {
        return e.status_code();
    }

    match privsep::exec_private(sub) {
        Ok(never) => match never {},
        Err(e) => e.status_code(),
    }
}

fn bind_listen_sockets(log: &Logger, config: &AgentConfig) -> Result<Vec<RawFd>, u32> {
    let mut out = Vec::new();
    for addr in &config.listen {
        match TcpListener::bind(addr.as_str()) {
            Ok(listener) => {
                info!(log, "listening on {addr}");
                out.push(listener.into_raw_fd());
            }
            Err(e) => {
                error!(log, "cannot bind {addr}: {e}");
                return Err(error_status(Service::Listener, ipc::SOCKETPAIR_FAILURE));
            }
        }
    }
    Ok(out)
}

/// Installs the root block certificate under its reserved global-settings
/// key, through a short-lived child holding only the setting-write
/// capability.
fn seed_root_block(log: &Logger, data_fd: RawFd, path: &str) -> Result<(), u32> {
    let cert = std::fs::read(path)
        .map_err(|_| error_status(Service::General, ipc::READ_FAILURE))?;

    let mut mask = BitCap::none();
    for cap in [
        ApiCap::ChildContextCreate,
        ApiCap::ChildContextClose,
        ApiCap::AppGlobalSettingWrite,
    ] {
        mask.set(cap);
    }

    let client = DataClient::new(data_fd);
    let child = client.child_context_create(&mask).map_err(data_api_status)?;
    client
        .global_settings_set(child, GLOBAL_SETTING_ROOT_BLOCK, &cert)
        .map_err(data_api_status)?;
    client.child_context_close(child).map_err(data_api_status)?;
    info!(log, "root block certificate installed from {path}");
    Ok(())
}

fn data_api_status(e: DataApiError) -> u32 {
    match e {
        DataApiError::Status(status) => status,
        _ => error_status(Service::Data, data::STORE_FAILURE),
    }
}

/// The session secret: the configured secret file, or fresh entropy from
/// the random service.
fn load_secret(config: &AgentConfig, rand_sock: RawFd) -> Result<Vec<u8>, u32> {
    if let Some(path) = &config.secret_file {
        let secret = std::fs::read(path)
            .map_err(|_| error_status(Service::General, ipc::READ_FAILURE))?;
        if secret.len() < 32 {
            return Err(error_status(Service::General, ipc::UNEXPECTED_SIZE));
        }
        return Ok(secret[..32].to_vec());
    }
    random_bytes(rand_sock, 32)
}

fn random_bytes(rand_sock: RawFd, count: u32) -> Result<Vec<u8>, u32> {
    blocking::write_data(rand_sock, &randomservice::encode_request(0, count))
        .map_err(|e| e.status_code())?;
    let raw = blocking::read_data(rand_sock).map_err(|e| e.status_code())?;
    let (_, status, bytes) = randomservice::decode_response(&raw)
        .map_err(|_| error_status(Service::General, ipc::UNEXPECTED_TYPE))?;
    if is_error(status) {
        return Err(status);
    }
    Ok(bytes.to_vec())
}

fn send_initialize(fd: RawFd, init: &InitializeRequest) -> Result<(), u32> {
    let mut raw = init.encode();
    let result = blocking::write_data(fd, &raw);
    agentd_wire::mem::wipe(&mut raw);
    result.map_err(|e| e.status_code())?;

    let raw = blocking::read_data(fd).map_err(|e| e.status_code())?;
    let status = agentd_wire::authservice::decode_response(&raw)
        .map_err(|_| error_status(Service::Auth, agentd_wire::status::auth::REQUEST_BAD))?;
    if status != STATUS_SUCCESS {
        return Err(status);
    }
    Ok(())
}

fn start_canonization(ctl: RawFd, config: &AgentConfig) -> Result<(), u32> {
    for request in [
        ControlRequest::Configure {
            max_seconds: config.canonization.max_seconds,
            max_transactions: config.canonization.max_transactions,
        },
        ControlRequest::Start,
    ] {
        blocking::write_data(ctl, &request.encode()).map_err(|e| e.status_code())?;
        let raw = blocking::read_data(ctl).map_err(|e| e.status_code())?;
        let (_, status) = decode_control_response(&raw).map_err(|_| {
            error_status(
                Service::Consensus,
                agentd_wire::status::consensus::BAD_PARAMETER,
            )
        })?;
        if status != STATUS_SUCCESS {
            return Err(status);
        }
    }
    Ok(())
}

// The supervisor wiring forks real processes and is exercised by the
// system-level flow rather than unit tests; the pieces it is built from
// (privsep, process, config, the service shells and the data client) are
// covered in their own modules.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_binding_reports_bad_addresses() {
        let log = logging::stderr_logger(0);
        let mut config = AgentConfig::default();
        config.listen.push("not-an-address".to_string());
        assert!(bind_listen_sockets(&log, &config).is_err());
    }

    #[test]
    fn listen_binding_accepts_loopback() {
        let log = logging::stderr_logger(0);
        let mut config = AgentConfig::default();
        config.listen.push("127.0.0.1:0".to_string());
        let fds = bind_listen_sockets(&log, &config).unwrap();
        assert_eq!(fds.len(), 1);
        let _ = nix::unistd::close(fds[0]);
    }
}
