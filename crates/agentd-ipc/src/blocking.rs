//! Blocking typed packet I/O.
//!
//! Used by bootstrap code and the supervisor, which run before any event
//! loop exists. Each call transfers exactly one packet; short transfers at
//! the byte level are retried until the packet completes or the socket
//! errors.

use crate::error::IpcError;
use agentd_wire::packet::{self, HEADER_SIZE, MAX_PAYLOAD, PacketType, RawPacket};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

/// Reads exactly `buf.len()` bytes.
fn read_exact(fd: RawFd, buf: &mut [u8]) -> Result<(), IpcError> {
    let mut done = 0;
    while done < buf.len() {
        match nix::unistd::read(fd, &mut buf[done..]) {
            Ok(0) => return Err(IpcError::ConnectionClosed),
            Ok(n) => done += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(IpcError::ReadFailure(e)),
        }
    }
    Ok(())
}

/// Writes all of `buf`.
fn write_all(fd: RawFd, buf: &[u8]) -> Result<(), IpcError> {
    let mut done = 0;
    while done < buf.len() {
        match nix::unistd::write(fd, &buf[done..]) {
            Ok(0) => return Err(IpcError::WriteFailure(Errno::EIO)),
            Ok(n) => done += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(IpcError::WriteFailure(e)),
        }
    }
    Ok(())
}

/// Writes one packet of the given type.
pub fn write_packet(fd: RawFd, ty: PacketType, payload: &[u8]) -> Result<(), IpcError> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    packet::encode(&mut buf, ty, payload);
    write_all(fd, &buf)
}

/// Reads one packet of any type.
pub fn read_packet(fd: RawFd) -> Result<RawPacket, IpcError> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact(fd, &mut header)?;

    let ty = PacketType::from_u8(header[0])
        .ok_or_else(|| IpcError::from(packet::PacketError::UnknownType(header[0])))?;
    let mut raw_len = [0u8; 4];
    raw_len.copy_from_slice(&header[1..5]);
    let len = u32::from_be_bytes(raw_len);
    if len > MAX_PAYLOAD {
        return Err(packet::PacketError::PayloadTooLarge(len).into());
    }
    if let Some(width) = ty.fixed_width()
        && width != len
    {
        return Err(packet::PacketError::UnexpectedSize {
            expected: width,
            actual: len,
        }
        .into());
    }

    let mut payload = vec![0u8; len as usize];
    read_exact(fd, &mut payload)?;
    Ok(RawPacket { ty, payload })
}

/// Writes a `UINT8` packet.
pub fn write_u8(fd: RawFd, v: u8) -> Result<(), IpcError> {
    write_packet(fd, PacketType::Uint8, &[v])
}

/// Writes an `INT8` packet.
pub fn write_i8(fd: RawFd, v: i8) -> Result<(), IpcError> {
    write_packet(fd, PacketType::Int8, &[v as u8])
}

/// Writes a `UINT64` packet.
pub fn write_u64(fd: RawFd, v: u64) -> Result<(), IpcError> {
    write_packet(fd, PacketType::Uint64, &v.to_be_bytes())
}

/// Writes an `INT64` packet.
pub fn write_i64(fd: RawFd, v: i64) -> Result<(), IpcError> {
    write_packet(fd, PacketType::Int64, &v.to_be_bytes())
}

/// Writes a `STRING` packet. No terminator goes on the wire.
pub fn write_string(fd: RawFd, v: &str) -> Result<(), IpcError> {
    write_packet(fd, PacketType::String, v.as_bytes())
}

/// Writes a `DATA_PACKET` packet.
pub fn write_data(fd: RawFd, v: &[u8]) -> Result<(), IpcError> {
    write_packet(fd, PacketType::DataPacket, v)
}

/// Reads a `UINT8` packet.
pub fn read_u8(fd: RawFd) -> Result<u8, IpcError> {
    let p = read_packet(fd)?;
    packet::decode_u8(&p).map_err(IpcError::from)
}

/// Reads an `INT8` packet.
pub fn read_i8(fd: RawFd) -> Result<i8, IpcError> {
    let p = read_packet(fd)?;
    packet::decode_i8(&p).map_err(IpcError::from)
}

/// Reads a `UINT64` packet.
pub fn read_u64(fd: RawFd) -> Result<u64, IpcError> {
    let p = read_packet(fd)?;
    packet::decode_u64(&p).map_err(IpcError::from)
}

/// Reads an `INT64` packet.
pub fn read_i64(fd: RawFd) -> Result<i64, IpcError> {
    let p = read_packet(fd)?;
    packet::decode_i64(&p).map_err(IpcError::from)
}

/// Reads a `STRING` packet, materializing an owned string.
pub fn read_string(fd: RawFd) -> Result<String, IpcError> {
    let p = read_packet(fd)?;
    packet::decode_string(&p).map_err(IpcError::from)
}

/// Reads a `DATA_PACKET` packet.
pub fn read_data(fd: RawFd) -> Result<Vec<u8>, IpcError> {
    let p = read_packet(fd)?;
    packet::decode_data(&p).map_err(IpcError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket;

    fn pair() -> (RawFd, RawFd) {
        socket::stream_pair().unwrap()
    }

    fn done(lhs: RawFd, rhs: RawFd) {
        socket::close(lhs).unwrap();
        socket::close(rhs).unwrap();
    }

    #[test]
    fn typed_round_trip_in_order() {
        let (lhs, rhs) = pair();

        write_u64(lhs, 0x0123_4567_89AB_CDEF).unwrap();
        write_string(lhs, "test").unwrap();
        write_data(lhs, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        assert_eq!(read_u64(rhs).unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(read_string(rhs).unwrap(), "test");
        assert_eq!(read_data(rhs).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);

        // The socket must now be empty.
        socket::make_noblock(rhs).unwrap();
        assert!(matches!(
            nix::unistd::read(rhs, &mut [0u8; 1]),
            Err(nix::errno::Errno::EAGAIN)
        ));

        done(lhs, rhs);
    }

    #[test]
    fn i64_round_trip() {
        let (lhs, rhs) = pair();
        write_i64(lhs, -12345).unwrap();
        assert_eq!(read_i64(rhs).unwrap(), -12345);
        done(lhs, rhs);
    }

    #[test]
    fn u8_and_i8_round_trip() {
        let (lhs, rhs) = pair();
        write_u8(lhs, 0xFE).unwrap();
        write_i8(lhs, -3).unwrap();
        assert_eq!(read_u8(rhs).unwrap(), 0xFE);
        assert_eq!(read_i8(rhs).unwrap(), -3);
        done(lhs, rhs);
    }

    #[test]
    fn type_mismatch_is_detected() {
        let (lhs, rhs) = pair();
        write_string(lhs, "not a number").unwrap();
        assert!(matches!(read_u64(rhs), Err(IpcError::UnexpectedType(_))));
        done(lhs, rhs);
    }

    #[test]
    fn eof_is_connection_closed() {
        let (lhs, rhs) = pair();
        socket::close(lhs).unwrap();
        assert!(matches!(read_u8(rhs), Err(IpcError::ConnectionClosed)));
        socket::close(rhs).unwrap();
    }

    #[test]
    fn bad_declared_size_is_detected() {
        let (lhs, rhs) = pair();
        // A UINT64 header declaring 4 payload bytes.
        write_all(lhs, &[PacketType::Uint64 as u8, 0, 0, 0, 4, 1, 2, 3, 4]).unwrap();
        assert!(matches!(read_u64(rhs), Err(IpcError::UnexpectedSize(_))));
        done(lhs, rhs);
    }

    #[test]
    fn empty_data_packet_round_trip() {
        let (lhs, rhs) = pair();
        write_data(lhs, &[]).unwrap();
        assert_eq!(read_data(rhs).unwrap(), Vec::<u8>::new());
        done(lhs, rhs);
    }
}
