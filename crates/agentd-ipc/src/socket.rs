//! Socket pairs and blocking-mode control.

use crate::error::IpcError;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use std::os::unix::io::RawFd;

/// Creates a connected stream socket pair in the local domain.
///
/// Returns the left- and right-hand descriptors. Both are blocking.
pub fn stream_pair() -> Result<(RawFd, RawFd), IpcError> {
    socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(IpcError::SocketPair)
}

/// Moves a descriptor to synchronous (blocking) I/O by clearing
/// `O_NONBLOCK`.
pub fn make_block(fd: RawFd) -> Result<(), IpcError> {
    let flags = read_flags(fd)?;
    set_flags(fd, flags & !OFlag::O_NONBLOCK)
}

/// Moves a descriptor to asynchronous (non-blocking) I/O by setting
/// `O_NONBLOCK`.
pub fn make_noblock(fd: RawFd) -> Result<(), IpcError> {
    let flags = read_flags(fd)?;
    set_flags(fd, flags | OFlag::O_NONBLOCK)
}

/// True if the descriptor currently has `O_NONBLOCK` set.
pub fn is_noblock(fd: RawFd) -> Result<bool, IpcError> {
    Ok(read_flags(fd)?.contains(OFlag::O_NONBLOCK))
}

/// Closes a descriptor.
pub fn close(fd: RawFd) -> Result<(), IpcError> {
    nix::unistd::close(fd).map_err(IpcError::CloseFailure)?;
    Ok(())
}

fn read_flags(fd: RawFd) -> Result<OFlag, IpcError> {
    let raw = fcntl(fd, FcntlArg::F_GETFL).map_err(IpcError::FcntlGetFl)?;
    Ok(OFlag::from_bits_truncate(raw))
}

fn set_flags(fd: RawFd, flags: OFlag) -> Result<(), IpcError> {
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(IpcError::FcntlSetFl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_starts_blocking() {
        let (lhs, rhs) = stream_pair().unwrap();
        assert!(!is_noblock(lhs).unwrap());
        assert!(!is_noblock(rhs).unwrap());
        close(lhs).unwrap();
        close(rhs).unwrap();
    }

    #[test]
    fn noblock_toggle_round_trip() {
        let (lhs, rhs) = stream_pair().unwrap();

        make_noblock(lhs).unwrap();
        assert!(is_noblock(lhs).unwrap());

        make_block(lhs).unwrap();
        assert!(!is_noblock(lhs).unwrap());

        close(lhs).unwrap();
        close(rhs).unwrap();
    }

    #[test]
    fn fcntl_on_closed_fd_fails() {
        let (lhs, rhs) = stream_pair().unwrap();
        close(lhs).unwrap();
        close(rhs).unwrap();
        assert!(matches!(make_noblock(lhs), Err(IpcError::FcntlGetFl(_))));
    }
}
