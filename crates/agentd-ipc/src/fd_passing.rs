//! Out-of-band descriptor passing.
//!
//! Transfers an open descriptor between processes over a local socket using
//! SCM_RIGHTS ancillary data. The kernel rejects ancillary-only messages,
//! so each transfer carries a single dummy byte.

use crate::error::IpcError;
use nix::cmsg_space;
use nix::sys::socket::{
    ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg,
};
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::RawFd;

/// Sends an open descriptor to the peer.
pub fn send_descriptor(sock: RawFd, fd_to_send: RawFd) -> Result<(), IpcError> {
    let dummy = [0u8; 1];
    let iov = [IoSlice::new(&dummy)];
    let fds = [fd_to_send];
    let cmsg = [ControlMessage::ScmRights(&fds)];

    // MSG_NOSIGNAL: a vanished peer surfaces as an error, not SIGPIPE.
    sendmsg::<()>(sock, &iov, &cmsg, MsgFlags::MSG_NOSIGNAL, None)
        .map_err(|_| IpcError::DescriptorPassing)?;
    Ok(())
}

/// Receives a descriptor from the peer.
///
/// The returned descriptor is open and owned by the caller.
pub fn recv_descriptor(sock: RawFd) -> Result<RawFd, IpcError> {
    let mut dummy = [0u8; 1];
    let mut iov = [IoSliceMut::new(&mut dummy)];
    let mut cmsg_buffer = cmsg_space!([RawFd; 1]);

    let msg = recvmsg::<()>(sock, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
        .map_err(|e| match e {
            nix::errno::Errno::EAGAIN => IpcError::WouldBlock,
            _ => IpcError::DescriptorPassing,
        })?;
    if msg.bytes == 0 {
        return Err(IpcError::ConnectionClosed);
    }

    for cmsg in msg.cmsgs() {
        if let ControlMessageOwned::ScmRights(fds) = cmsg
            && let Some(&fd) = fds.first()
        {
            return Ok(fd);
        }
    }
    Err(IpcError::DescriptorPassing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{blocking, socket};

    #[test]
    fn descriptor_survives_transfer() {
        let (lhs, rhs) = socket::stream_pair().unwrap();
        let (inner_lhs, inner_rhs) = socket::stream_pair().unwrap();

        // Ship one end of the inner pair across the outer pair.
        send_descriptor(lhs, inner_rhs).unwrap();
        let received = recv_descriptor(rhs).unwrap();

        // The received descriptor is live: bytes written into the inner
        // pair arrive through it.
        blocking::write_string(inner_lhs, "through the wormhole").unwrap();
        assert_eq!(blocking::read_string(received).unwrap(), "through the wormhole");

        for fd in [lhs, rhs, inner_lhs, inner_rhs, received] {
            let _ = socket::close(fd);
        }
    }

    #[test]
    fn recv_on_closed_peer_fails() {
        let (lhs, rhs) = socket::stream_pair().unwrap();
        socket::close(lhs).unwrap();
        assert!(matches!(
            recv_descriptor(rhs),
            Err(IpcError::ConnectionClosed)
        ));
        socket::close(rhs).unwrap();
    }

    #[test]
    fn plain_byte_without_rights_is_rejected() {
        let (lhs, rhs) = socket::stream_pair().unwrap();
        nix::unistd::write(lhs, &[0u8]).unwrap();
        assert!(matches!(
            recv_descriptor(rhs),
            Err(IpcError::DescriptorPassing)
        ));
        socket::close(lhs).unwrap();
        socket::close(rhs).unwrap();
    }
}
