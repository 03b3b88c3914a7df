//! Status-code envelope.
//!
//! Every failure crossing a socket or surfacing as a process exit is a
//! 32-bit status: `0x08000000 | (service_id << 16) | reason`. Zero is
//! success. The service identifier names the subsystem that produced the
//! error; the low 16 bits carry the per-service reason.

/// Success status.
pub const STATUS_SUCCESS: u32 = 0;

/// High bit pattern marking a status as an error.
const ERROR_FLAG: u32 = 0x0800_0000;

/// Subsystems that can originate a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Service {
    /// Code that does not belong to a particular service.
    General = 0x00,
    /// Inter-process communication pseudo-service.
    Ipc = 0x01,
    /// Supervisor service.
    Supervisor = 0x02,
    /// Data service.
    Data = 0x03,
    /// Config service.
    Config = 0x04,
    /// Auth service.
    Auth = 0x05,
    /// Log pseudo-service.
    Log = 0x06,
    /// Consensus / canonization service.
    Consensus = 0x07,
    /// Application service.
    Application = 0x08,
    /// Protocol service.
    Protocol = 0x09,
    /// Listener service.
    Listener = 0x0A,
}

impl Service {
    /// Parses a service identifier from a status code's service field.
    pub fn from_u8(v: u8) -> Option<Service> {
        match v {
            0x00 => Some(Service::General),
            0x01 => Some(Service::Ipc),
            0x02 => Some(Service::Supervisor),
            0x03 => Some(Service::Data),
            0x04 => Some(Service::Config),
            0x05 => Some(Service::Auth),
            0x06 => Some(Service::Log),
            0x07 => Some(Service::Consensus),
            0x08 => Some(Service::Application),
            0x09 => Some(Service::Protocol),
            0x0A => Some(Service::Listener),
            _ => None,
        }
    }
}

/// Builds an error status from a service and reason.
#[inline]
pub const fn error_status(service: Service, reason: u16) -> u32 {
    ERROR_FLAG | ((service as u32) << 16) | reason as u32
}

/// True if the status is an error.
#[inline]
pub const fn is_error(status: u32) -> bool {
    status & ERROR_FLAG != 0
}

/// Extracts the service field of an error status.
#[inline]
pub fn status_service(status: u32) -> Option<Service> {
    Service::from_u8(((status >> 16) & 0xFF) as u8)
}

/// Extracts the reason field of an error status.
#[inline]
pub const fn status_reason(status: u32) -> u16 {
    (status & 0xFFFF) as u16
}

/// Reason codes originating in general (service-agnostic) code.
pub mod general {
    /// Allocation failure while encoding or decoding.
    pub const OUT_OF_MEMORY: u16 = 0x0001;
    /// `chdir` into the chroot target failed.
    pub const CHDIR_FAILURE: u16 = 0x0002;
    /// `chroot` failed.
    pub const CHROOT_FAILURE: u16 = 0x0003;
    /// User name lookup failed.
    pub const GETPWNAM_FAILURE: u16 = 0x0004;
    /// Group name lookup failed.
    pub const GETGRNAM_FAILURE: u16 = 0x0005;
    /// Setting the effective group id failed.
    pub const SETEGID_FAILURE: u16 = 0x0006;
    /// Setting the effective user id failed.
    pub const SETEUID_FAILURE: u16 = 0x0007;
    /// Setting the real group id failed.
    pub const SETGID_FAILURE: u16 = 0x0008;
    /// Setting the real user id failed.
    pub const SETUID_FAILURE: u16 = 0x0009;
    /// A descriptor remap (`dup2`) failed.
    pub const SETFDS_DUP2_FAILURE: u16 = 0x000A;
    /// A descriptor pair list was malformed.
    pub const SETFDS_BAD_ARGUMENT: u16 = 0x000B;
    /// Closing standard input failed.
    pub const CLOSE_STDIN_FAILURE: u16 = 0x000C;
    /// Closing standard output failed.
    pub const CLOSE_STDOUT_FAILURE: u16 = 0x000D;
    /// Closing standard error failed.
    pub const CLOSE_STDERR_FAILURE: u16 = 0x000E;
    /// Closing a protected descriptor failed.
    pub const CLOSE_FAILURE: u16 = 0x000F;
    /// Setting the private-command environment failed.
    pub const EXEC_PRIVATE_ENV_FAILURE: u16 = 0x0010;
    /// The private-command exec itself failed.
    pub const EXEC_PRIVATE_EXEC_FAILURE: u16 = 0x0011;
    /// `fork` failed.
    pub const FORK_FAILURE: u16 = 0x0012;
    /// The caller must be the superuser.
    pub const ROOT_USER_REQUIRED: u16 = 0x0013;
}

/// Reason codes originating in the IPC layer.
pub mod ipc {
    /// The operation would block.
    pub const WOULD_BLOCK: u16 = 0x0001;
    /// A blocking or buffered read failed short.
    pub const READ_FAILURE: u16 = 0x0002;
    /// A blocking or buffered write failed short.
    pub const WRITE_FAILURE: u16 = 0x0003;
    /// The wire type byte was not the expected type.
    pub const UNEXPECTED_TYPE: u16 = 0x0004;
    /// The declared size did not match the type's width.
    pub const UNEXPECTED_SIZE: u16 = 0x0005;
    /// Creating a socket pair failed.
    pub const SOCKETPAIR_FAILURE: u16 = 0x0006;
    /// Reading descriptor flags failed.
    pub const FCNTL_GETFL_FAILURE: u16 = 0x0007;
    /// Writing descriptor flags failed.
    pub const FCNTL_SETFL_FAILURE: u16 = 0x0008;
    /// Event loop initialization failed.
    pub const EVENT_LOOP_INIT_FAILURE: u16 = 0x0009;
    /// Registering a socket with the event loop failed.
    pub const EVENT_LOOP_ADD_FAILURE: u16 = 0x000A;
    /// Running the event loop failed.
    pub const EVENT_LOOP_RUN_FAILURE: u16 = 0x000B;
    /// Authentication of a frame failed (MAC or nonce).
    pub const AUTH_FAILURE: u16 = 0x000C;
    /// The peer closed the connection.
    pub const CONNECTION_CLOSED: u16 = 0x000D;
    /// Out-of-band descriptor transfer failed.
    pub const DESCRIPTOR_PASSING_FAILURE: u16 = 0x000E;
    /// Installing a signal handler failed.
    pub const SIGNAL_INSTALL_FAILURE: u16 = 0x000F;
    /// Closing a descriptor failed.
    pub const CLOSE_FAILURE: u16 = 0x0010;
}

/// Reason codes originating in the data service.
pub mod data {
    /// The handle lacks the capability for the requested method.
    pub const NOT_AUTHORIZED: u16 = 0x0001;
    /// The child-index offset names no open child context.
    pub const CHILD_NOT_FOUND: u16 = 0x0002;
    /// A request body had the wrong size.
    pub const INVALID_SIZE: u16 = 0x0003;
    /// A request parameter was invalid.
    pub const INVALID_PARAMETER: u16 = 0x0004;
    /// The requested record does not exist.
    pub const NOT_FOUND: u16 = 0x0005;
    /// A response carried an unexpected method identifier.
    pub const UNEXPECTED_METHOD: u16 = 0x0006;
    /// The child-context arena is full.
    pub const CHILD_LIMIT: u16 = 0x0007;
    /// No root context has been initialized.
    pub const NO_ROOT_CONTEXT: u16 = 0x0008;
    /// The root context was already initialized.
    pub const ROOT_CONTEXT_EXISTS: u16 = 0x0009;
    /// The backing store rejected the operation.
    pub const STORE_FAILURE: u16 = 0x000A;
}

/// Reason codes originating in the config service.
pub mod config {
    /// The config document did not parse.
    pub const PARSE_FAILURE: u16 = 0x0001;
    /// Reading the config input failed.
    pub const READ_FAILURE: u16 = 0x0002;
    /// Writing the framed config failed.
    pub const WRITE_FAILURE: u16 = 0x0003;
}

/// Reason codes originating in the auth service.
pub mod auth {
    /// A request packet had the wrong size.
    pub const REQUEST_INVALID_SIZE: u16 = 0x0001;
    /// A request packet did not decode.
    pub const REQUEST_BAD: u16 = 0x0002;
}

/// Reason codes originating in the canonization service.
pub mod consensus {
    /// A control request carried invalid parameters.
    pub const BAD_PARAMETER: u16 = 0x0001;
    /// Start was requested before configure.
    pub const NOT_CONFIGURED: u16 = 0x0002;
    /// The canonization timer is already running.
    pub const ALREADY_STARTED: u16 = 0x0003;
}

/// Reason codes originating in the protocol service.
pub mod protocol {
    /// A client request did not decode.
    pub const REQUEST_BAD: u16 = 0x0001;
    /// The session is not initialized.
    pub const NOT_INITIALIZED: u16 = 0x0002;
}

/// Reason codes originating in the listener service.
pub mod listener {
    /// Accepting a connection failed.
    pub const ACCEPT_FAILURE: u16 = 0x0001;
    /// Forwarding an accepted descriptor failed.
    pub const FORWARD_FAILURE: u16 = 0x0002;
}

/// Reason codes originating in process lifecycle management.
pub mod process {
    /// The process was already spawned.
    pub const ALREADY_SPAWNED: u16 = 0x0001;
    /// Attempt to stop a process that is not running.
    pub const NOT_ACTIVE: u16 = 0x0002;
    /// Waiting on the process failed.
    pub const WAIT_FAILURE: u16 = 0x0003;
    /// Signalling the process failed.
    pub const KILL_FAILURE: u16 = 0x0004;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_not_error() {
        assert!(!is_error(STATUS_SUCCESS));
    }

    #[test]
    fn envelope_round_trip() {
        let code = error_status(Service::Data, data::NOT_AUTHORIZED);
        assert!(is_error(code));
        assert_eq!(status_service(code), Some(Service::Data));
        assert_eq!(status_reason(code), data::NOT_AUTHORIZED);
    }

    #[test]
    fn envelope_bit_layout() {
        let code = error_status(Service::Listener, 0x0042);
        assert_eq!(code, 0x0800_0000 | (0x0A << 16) | 0x42);
    }

    #[test]
    fn service_round_trip() {
        for raw in 0x00..=0x0A {
            let svc = Service::from_u8(raw).unwrap();
            assert_eq!(svc as u8, raw);
        }
        assert!(Service::from_u8(0x0B).is_none());
    }
}
