//! Well-known descriptor slots.
//!
//! After the supervisor forks a service and the descriptor table is
//! remapped, each private sub-command finds its sockets at these fixed
//! slots. The numbers are part of the ABI between parent and child and
//! must not move.

use std::os::unix::io::RawFd;

/// readconfig: the config input file.
pub const CONFIG_IN: RawFd = 0;
/// readconfig: the framed config output stream.
pub const CONFIG_OUT: RawFd = 1;

/// dataservice: the request socket.
pub const DATASERVICE_SOCK: RawFd = 0;
/// dataservice: the log socket.
pub const DATASERVICE_LOG: RawFd = 1;
/// dataservice: the secondary request socket (canonization side).
pub const DATASERVICE_SOCK_SECONDARY: RawFd = 2;

/// randomservice: the request socket.
pub const RANDOMSERVICE_SOCK: RawFd = 0;
/// randomservice: the log socket.
pub const RANDOMSERVICE_LOG: RawFd = 1;

/// authservice: the request socket.
pub const AUTHSERVICE_SOCK: RawFd = 0;
/// authservice: the log socket.
pub const AUTHSERVICE_LOG: RawFd = 1;

/// listenservice: the log socket.
pub const LISTENSERVICE_LOG: RawFd = 0;
/// listenservice: the socket accepted connections are forwarded on.
pub const LISTENSERVICE_ACCEPT: RawFd = 1;
/// listenservice: the first listen socket; further listen sockets follow
/// at consecutive slots.
pub const LISTENSERVICE_SOCK_START: RawFd = 2;

/// supervisor: the locked PID file.
pub const SUPERVISOR_PID: RawFd = 2;

/// protocolservice: the socket client descriptors arrive on.
pub const PROTOCOLSERVICE_ACCEPT: RawFd = 0;
/// protocolservice: the log socket.
pub const PROTOCOLSERVICE_LOG: RawFd = 1;
/// protocolservice: the data service socket.
pub const PROTOCOLSERVICE_DATA: RawFd = 2;
/// protocolservice: the supervisor control socket.
pub const PROTOCOLSERVICE_CONTROL: RawFd = 3;

/// canonizationservice: the data service socket.
pub const CANONIZATION_DATA: RawFd = 0;
/// canonizationservice: the log socket.
pub const CANONIZATION_LOG: RawFd = 1;
/// canonizationservice: the supervisor control socket.
pub const CANONIZATION_CONTROL: RawFd = 2;
