//! Non-blocking socket contexts.
//!
//! A [`SocketContext`] wraps a non-blocking descriptor with an input buffer
//! and an output buffer queue. Typed writes append whole packets to the
//! output queue, so a caller never observes a partial packet; typed reads
//! lift whole packets off the input buffer or report *would-block*. The
//! event loop drains both buffers as the kernel signals readiness.

use crate::error::IpcError;
use agentd_wire::packet::{self, PacketType, RawPacket};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

const READ_CHUNK: usize = 4096;

/// A non-blocking socket with buffered packet I/O.
#[derive(Debug)]
pub struct SocketContext {
    fd: RawFd,
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    out_pos: usize,
    eof: bool,
    closed: bool,
}

impl SocketContext {
    /// Wraps a descriptor already set to non-blocking mode.
    ///
    /// The context owns the descriptor and closes it on drop.
    pub fn new(fd: RawFd) -> SocketContext {
        SocketContext {
            fd,
            inbuf: Vec::new(),
            outbuf: Vec::new(),
            out_pos: 0,
            eof: false,
            closed: false,
        }
    }

    /// The wrapped descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// True once the peer has closed and the input buffer is exhausted.
    pub fn at_eof(&self) -> bool {
        self.eof && self.inbuf.is_empty()
    }

    /// True if buffered output is waiting for the socket to become
    /// writable.
    pub fn has_pending_output(&self) -> bool {
        self.out_pos < self.outbuf.len()
    }

    /// Pulls available bytes from the socket into the input buffer.
    ///
    /// Stops at *would-block*. Peer closure is recorded, not reported as an
    /// error; readers see it once buffered packets are exhausted.
    pub fn fill_input(&mut self) -> Result<usize, IpcError> {
        let mut total = 0;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match nix::unistd::read(self.fd, &mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(total);
                }
                Ok(n) => {
                    self.inbuf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(Errno::EAGAIN) => return Ok(total),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(IpcError::ReadFailure(e)),
            }
        }
    }

    /// Pushes buffered output to the socket.
    ///
    /// Stops at *would-block*; remaining bytes stay queued.
    pub fn flush_output(&mut self) -> Result<(), IpcError> {
        while self.out_pos < self.outbuf.len() {
            match nix::unistd::write(self.fd, &self.outbuf[self.out_pos..]) {
                Ok(0) => return Err(IpcError::WriteFailure(Errno::EIO)),
                Ok(n) => self.out_pos += n,
                Err(Errno::EAGAIN) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(IpcError::WriteFailure(e)),
            }
        }
        self.outbuf.clear();
        self.out_pos = 0;
        Ok(())
    }

    /// Lifts one packet of any type off the input buffer.
    ///
    /// Reports *would-block* while incomplete and *connection-closed* once
    /// the peer is gone and nothing more is buffered.
    pub fn read_packet(&mut self) -> Result<RawPacket, IpcError> {
        match packet::split_front(&self.inbuf)? {
            Some((pkt, consumed)) => {
                self.inbuf.drain(..consumed);
                Ok(pkt)
            }
            None => {
                if self.eof {
                    Err(IpcError::ConnectionClosed)
                } else {
                    Err(IpcError::WouldBlock)
                }
            }
        }
    }

    /// Reads a `UINT8` packet.
    pub fn read_u8(&mut self) -> Result<u8, IpcError> {
        let p = self.read_packet()?;
        packet::decode_u8(&p).map_err(IpcError::from)
    }

    /// Reads an `INT8` packet.
    pub fn read_i8(&mut self) -> Result<i8, IpcError> {
        let p = self.read_packet()?;
        packet::decode_i8(&p).map_err(IpcError::from)
    }

    /// Reads a `UINT64` packet.
    pub fn read_u64(&mut self) -> Result<u64, IpcError> {
        let p = self.read_packet()?;
        packet::decode_u64(&p).map_err(IpcError::from)
    }

    /// Reads an `INT64` packet.
    pub fn read_i64(&mut self) -> Result<i64, IpcError> {
        let p = self.read_packet()?;
        packet::decode_i64(&p).map_err(IpcError::from)
    }

    /// Reads a `STRING` packet.
    pub fn read_string(&mut self) -> Result<String, IpcError> {
        let p = self.read_packet()?;
        packet::decode_string(&p).map_err(IpcError::from)
    }

    /// Reads a `DATA_PACKET` packet.
    pub fn read_data(&mut self) -> Result<Vec<u8>, IpcError> {
        let p = self.read_packet()?;
        packet::decode_data(&p).map_err(IpcError::from)
    }

    /// Queues a `UINT8` packet.
    pub fn write_u8(&mut self, v: u8) {
        packet::encode_u8(&mut self.outbuf, v);
    }

    /// Queues an `INT8` packet.
    pub fn write_i8(&mut self, v: i8) {
        packet::encode_i8(&mut self.outbuf, v);
    }

    /// Queues a `UINT64` packet.
    pub fn write_u64(&mut self, v: u64) {
        packet::encode_u64(&mut self.outbuf, v);
    }

    /// Queues an `INT64` packet.
    pub fn write_i64(&mut self, v: i64) {
        packet::encode_i64(&mut self.outbuf, v);
    }

    /// Queues a `STRING` packet.
    pub fn write_string(&mut self, v: &str) {
        packet::encode_string(&mut self.outbuf, v);
    }

    /// Queues a `DATA_PACKET` packet.
    pub fn write_data(&mut self, v: &[u8]) {
        packet::encode_data(&mut self.outbuf, v);
    }

    /// Queues a raw packet of the given type.
    pub fn write_typed(&mut self, ty: PacketType, payload: &[u8]) {
        packet::encode(&mut self.outbuf, ty, payload);
    }

    /// Closes the descriptor early, before drop.
    pub fn close(&mut self) {
        if !self.closed {
            let _ = nix::unistd::close(self.fd);
            self.closed = true;
        }
    }
}

impl Drop for SocketContext {
    fn drop(&mut self) {
        self.close();
    }
}
