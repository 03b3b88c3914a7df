//! # agentd-ipc
//!
//! The OS boundary of the agentd process family: socket pairs, blocking and
//! non-blocking framed packet I/O, out-of-band descriptor passing,
//! authenticated framing, and the readiness-driven event loop.
//!
//! Wire layouts live in `agentd-wire`; this crate moves those bytes across
//! local sockets. Blocking and non-blocking transports are interoperable on
//! the wire — bootstrap code and the supervisor use the blocking family,
//! services use socket contexts inside an event loop.

pub mod authed;
pub mod blocking;
pub mod error;
pub mod event_loop;
pub mod fd_passing;
pub mod nonblock;
pub mod signal;
pub mod socket;

pub use authed::{ChaCha20Poly1305Suite, CryptoSuite};
pub use error::IpcError;
pub use event_loop::{EventLoop, LoopControl};
pub use nonblock::SocketContext;
