//! IPC error taxonomy.
//!
//! Each variant is a distinct failure kind a transport caller can act on;
//! every variant maps onto the wire status envelope so services can report
//! transport failures in responses and exit codes.

use agentd_wire::packet::PacketError;
use agentd_wire::status::{Service, error_status, ipc};
use thiserror::Error;

/// Failures surfaced by the IPC layer.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The non-blocking operation cannot complete yet.
    #[error("operation would block")]
    WouldBlock,

    /// A read returned an error or fell short.
    #[error("socket read failed: {0}")]
    ReadFailure(nix::errno::Errno),

    /// A write returned an error or fell short.
    #[error("socket write failed: {0}")]
    WriteFailure(nix::errno::Errno),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The wire carried a different packet type than expected.
    #[error("{0}")]
    UnexpectedType(PacketError),

    /// The declared size did not match the type's width.
    #[error("{0}")]
    UnexpectedSize(PacketError),

    /// The declared payload size exceeds the transport limit.
    #[error("{0}")]
    PayloadTooLarge(PacketError),

    /// Creating a socket pair failed.
    #[error("socketpair failed: {0}")]
    SocketPair(nix::errno::Errno),

    /// Reading descriptor flags failed.
    #[error("fcntl(F_GETFL) failed: {0}")]
    FcntlGetFl(nix::errno::Errno),

    /// Writing descriptor flags failed.
    #[error("fcntl(F_SETFL) failed: {0}")]
    FcntlSetFl(nix::errno::Errno),

    /// MAC verification or nonce sequencing failed on an authenticated
    /// frame. The session must be dropped.
    #[error("frame authentication failed")]
    AuthFailure,

    /// Out-of-band descriptor transfer failed.
    #[error("descriptor passing failed")]
    DescriptorPassing,

    /// Installing a signal handler failed.
    #[error("signal handler installation failed: {0}")]
    SignalInstall(nix::errno::Errno),

    /// Closing a descriptor failed.
    #[error("close failed: {0}")]
    CloseFailure(nix::errno::Errno),

    /// Event loop initialization failed.
    #[error("event loop initialization failed")]
    EventLoopInit,

    /// Registering a socket with the event loop failed.
    #[error("event loop registration failed")]
    EventLoopAdd,

    /// Running the event loop failed.
    #[error("event loop run failed")]
    EventLoopRun,
}

impl IpcError {
    /// True for the *would-block* kind, which non-blocking callers retry.
    pub fn is_would_block(&self) -> bool {
        matches!(self, IpcError::WouldBlock)
    }

    /// The IPC reason code for this error.
    ///
    /// Services namespace transport failures under their own service
    /// identifier by pairing this reason with their id.
    pub fn reason_code(&self) -> u16 {
        match self {
            IpcError::WouldBlock => ipc::WOULD_BLOCK,
            IpcError::ReadFailure(_) => ipc::READ_FAILURE,
            IpcError::WriteFailure(_) => ipc::WRITE_FAILURE,
            IpcError::ConnectionClosed => ipc::CONNECTION_CLOSED,
            IpcError::UnexpectedType(_) => ipc::UNEXPECTED_TYPE,
            IpcError::UnexpectedSize(_) | IpcError::PayloadTooLarge(_) => ipc::UNEXPECTED_SIZE,
            IpcError::SocketPair(_) => ipc::SOCKETPAIR_FAILURE,
            IpcError::FcntlGetFl(_) => ipc::FCNTL_GETFL_FAILURE,
            IpcError::FcntlSetFl(_) => ipc::FCNTL_SETFL_FAILURE,
            IpcError::AuthFailure => ipc::AUTH_FAILURE,
            IpcError::DescriptorPassing => ipc::DESCRIPTOR_PASSING_FAILURE,
            IpcError::SignalInstall(_) => ipc::SIGNAL_INSTALL_FAILURE,
            IpcError::CloseFailure(_) => ipc::CLOSE_FAILURE,
            IpcError::EventLoopInit => ipc::EVENT_LOOP_INIT_FAILURE,
            IpcError::EventLoopAdd => ipc::EVENT_LOOP_ADD_FAILURE,
            IpcError::EventLoopRun => ipc::EVENT_LOOP_RUN_FAILURE,
        }
    }

    /// The wire status code for this error.
    pub fn status_code(&self) -> u32 {
        let reason = match self {
            IpcError::WouldBlock => ipc::WOULD_BLOCK,
            IpcError::ReadFailure(_) => ipc::READ_FAILURE,
            IpcError::WriteFailure(_) => ipc::WRITE_FAILURE,
            IpcError::ConnectionClosed => ipc::CONNECTION_CLOSED,
            IpcError::UnexpectedType(_) => ipc::UNEXPECTED_TYPE,
            IpcError::UnexpectedSize(_) => ipc::UNEXPECTED_SIZE,
            IpcError::PayloadTooLarge(_) => {
                return error_status(Service::General, agentd_wire::status::general::OUT_OF_MEMORY);
            }
            IpcError::SocketPair(_) => ipc::SOCKETPAIR_FAILURE,
            IpcError::FcntlGetFl(_) => ipc::FCNTL_GETFL_FAILURE,
            IpcError::FcntlSetFl(_) => ipc::FCNTL_SETFL_FAILURE,
            IpcError::AuthFailure => ipc::AUTH_FAILURE,
            IpcError::DescriptorPassing => ipc::DESCRIPTOR_PASSING_FAILURE,
            IpcError::SignalInstall(_) => ipc::SIGNAL_INSTALL_FAILURE,
            IpcError::CloseFailure(_) => ipc::CLOSE_FAILURE,
            IpcError::EventLoopInit => ipc::EVENT_LOOP_INIT_FAILURE,
            IpcError::EventLoopAdd => ipc::EVENT_LOOP_ADD_FAILURE,
            IpcError::EventLoopRun => ipc::EVENT_LOOP_RUN_FAILURE,
        };
        error_status(Service::Ipc, reason)
    }
}

impl From<PacketError> for IpcError {
    fn from(e: PacketError) -> Self {
        match e {
            PacketError::UnexpectedSize { .. } => IpcError::UnexpectedSize(e),
            PacketError::PayloadTooLarge(_) => IpcError::PayloadTooLarge(e),
            _ => IpcError::UnexpectedType(e),
        }
    }
}
