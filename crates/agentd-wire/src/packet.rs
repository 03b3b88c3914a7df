//! Typed length-prefixed packet model.
//!
//! Every value crossing a local socket is one packet:
//! `(type:u8, length:u32_be, payload:length bytes)`. Fixed-width numeric
//! types must declare exactly their width; strings travel without a
//! terminator. This module defines the format once; the blocking and
//! non-blocking transports in `agentd-ipc` both speak it.

use thiserror::Error;

/// Largest payload a well-formed peer will send.
///
/// A declared length above this is treated as an allocation attack rather
/// than honored.
pub const MAX_PAYLOAD: u32 = 0x0100_0000;

/// Bytes of framing overhead per packet (type byte + length word).
pub const HEADER_SIZE: usize = 5;

/// Wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Unsigned 8-bit value.
    Uint8 = 0x01,
    /// Signed 8-bit value.
    Int8 = 0x02,
    /// Unsigned 64-bit value.
    Uint64 = 0x03,
    /// Signed 64-bit value.
    Int64 = 0x04,
    /// UTF-8 text, no terminator on the wire.
    String = 0x05,
    /// Opaque bytes.
    DataPacket = 0x06,
}

impl PacketType {
    /// Parses a wire tag.
    pub fn from_u8(v: u8) -> Option<PacketType> {
        match v {
            0x01 => Some(PacketType::Uint8),
            0x02 => Some(PacketType::Int8),
            0x03 => Some(PacketType::Uint64),
            0x04 => Some(PacketType::Int64),
            0x05 => Some(PacketType::String),
            0x06 => Some(PacketType::DataPacket),
            _ => None,
        }
    }

    /// The exact payload width for fixed-width types, `None` otherwise.
    pub fn fixed_width(self) -> Option<u32> {
        match self {
            PacketType::Uint8 | PacketType::Int8 => Some(1),
            PacketType::Uint64 | PacketType::Int64 => Some(8),
            PacketType::String | PacketType::DataPacket => None,
        }
    }
}

/// Packet-level decode and encode failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// The type byte did not name a known packet type.
    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),

    /// The type byte named a different type than the caller expected.
    #[error("unexpected packet type: expected {expected:?}, got {actual:?}")]
    UnexpectedType {
        /// Type the reader asked for.
        expected: PacketType,
        /// Type found on the wire.
        actual: PacketType,
    },

    /// The declared length does not match the type's fixed width.
    #[error("unexpected packet size: expected {expected}, got {actual}")]
    UnexpectedSize {
        /// Width required by the type.
        expected: u32,
        /// Length declared on the wire.
        actual: u32,
    },

    /// The declared length exceeds [`MAX_PAYLOAD`].
    #[error("declared payload of {0} bytes exceeds limit")]
    PayloadTooLarge(u32),

    /// A string payload was not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidString,
}

/// Appends one packet to `buf`.
pub fn encode(buf: &mut Vec<u8>, ty: PacketType, payload: &[u8]) {
    buf.push(ty as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
}

/// Appends a `UINT8` packet.
pub fn encode_u8(buf: &mut Vec<u8>, v: u8) {
    encode(buf, PacketType::Uint8, &[v]);
}

/// Appends an `INT8` packet.
pub fn encode_i8(buf: &mut Vec<u8>, v: i8) {
    encode(buf, PacketType::Int8, &[v as u8]);
}

/// Appends a `UINT64` packet, big-endian payload.
pub fn encode_u64(buf: &mut Vec<u8>, v: u64) {
    encode(buf, PacketType::Uint64, &v.to_be_bytes());
}

/// Appends an `INT64` packet, big-endian payload.
pub fn encode_i64(buf: &mut Vec<u8>, v: i64) {
    encode(buf, PacketType::Int64, &v.to_be_bytes());
}

/// Appends a `STRING` packet. No terminator is written.
pub fn encode_string(buf: &mut Vec<u8>, v: &str) {
    encode(buf, PacketType::String, v.as_bytes());
}

/// Appends a `DATA_PACKET` packet.
pub fn encode_data(buf: &mut Vec<u8>, v: &[u8]) {
    encode(buf, PacketType::DataPacket, v);
}

/// One packet lifted off the front of a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Wire type of the packet.
    pub ty: PacketType,
    /// Owned payload bytes.
    pub payload: Vec<u8>,
}

/// Attempts to lift one whole packet off the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete packet
/// (the non-blocking reader treats this as *would-block*). On success the
/// packet and the number of bytes consumed are returned; the caller drains
/// them from its input buffer.
pub fn split_front(buf: &[u8]) -> Result<Option<(RawPacket, usize)>, PacketError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let ty = PacketType::from_u8(buf[0]).ok_or(PacketError::UnknownType(buf[0]))?;

    let mut raw_len = [0u8; 4];
    raw_len.copy_from_slice(&buf[1..5]);
    let len = u32::from_be_bytes(raw_len);
    if len > MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge(len));
    }
    if let Some(width) = ty.fixed_width()
        && width != len
    {
        return Err(PacketError::UnexpectedSize {
            expected: width,
            actual: len,
        });
    }

    let total = HEADER_SIZE + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let packet = RawPacket {
        ty,
        payload: buf[HEADER_SIZE..total].to_vec(),
    };
    Ok(Some((packet, total)))
}

/// Checks a packet's type against what the reader asked for.
pub fn expect_type(packet: &RawPacket, expected: PacketType) -> Result<(), PacketError> {
    if packet.ty != expected {
        return Err(PacketError::UnexpectedType {
            expected,
            actual: packet.ty,
        });
    }
    Ok(())
}

/// Extracts a `UINT8` value.
pub fn decode_u8(packet: &RawPacket) -> Result<u8, PacketError> {
    expect_type(packet, PacketType::Uint8)?;
    fixed_payload::<1>(packet).map(|raw| raw[0])
}

/// Extracts an `INT8` value.
pub fn decode_i8(packet: &RawPacket) -> Result<i8, PacketError> {
    expect_type(packet, PacketType::Int8)?;
    fixed_payload::<1>(packet).map(|raw| raw[0] as i8)
}

/// Extracts a `UINT64` value.
pub fn decode_u64(packet: &RawPacket) -> Result<u64, PacketError> {
    expect_type(packet, PacketType::Uint64)?;
    fixed_payload::<8>(packet).map(u64::from_be_bytes)
}

/// Extracts an `INT64` value.
pub fn decode_i64(packet: &RawPacket) -> Result<i64, PacketError> {
    expect_type(packet, PacketType::Int64)?;
    fixed_payload::<8>(packet).map(i64::from_be_bytes)
}

/// Extracts a `STRING` value, materializing an owned terminated string.
pub fn decode_string(packet: &RawPacket) -> Result<String, PacketError> {
    expect_type(packet, PacketType::String)?;
    String::from_utf8(packet.payload.clone()).map_err(|_| PacketError::InvalidString)
}

/// Extracts a `DATA_PACKET` payload.
pub fn decode_data(packet: &RawPacket) -> Result<Vec<u8>, PacketError> {
    expect_type(packet, PacketType::DataPacket)?;
    Ok(packet.payload.clone())
}

fn fixed_payload<const N: usize>(packet: &RawPacket) -> Result<[u8; N], PacketError> {
    if packet.payload.len() != N {
        return Err(PacketError::UnexpectedSize {
            expected: N as u32,
            actual: packet.payload.len() as u32,
        });
    }
    let mut raw = [0u8; N];
    raw.copy_from_slice(&packet.payload);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(buf: &[u8]) -> (RawPacket, usize) {
        split_front(buf).unwrap().expect("complete packet")
    }

    #[test]
    fn u64_round_trip() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 0x0123_4567_89AB_CDEF);
        let (packet, consumed) = one(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(decode_u64(&packet).unwrap(), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn i64_round_trip_negative() {
        let mut buf = Vec::new();
        encode_i64(&mut buf, -42);
        let (packet, _) = one(&buf);
        assert_eq!(decode_i64(&packet).unwrap(), -42);
    }

    #[test]
    fn u8_round_trip() {
        let mut buf = Vec::new();
        encode_u8(&mut buf, 0x7F);
        let (packet, _) = one(&buf);
        assert_eq!(decode_u8(&packet).unwrap(), 0x7F);
    }

    #[test]
    fn string_has_no_terminator_on_wire() {
        let mut buf = Vec::new();
        encode_string(&mut buf, "test");
        assert_eq!(&buf[HEADER_SIZE..], b"test");
        let (packet, _) = one(&buf);
        assert_eq!(decode_string(&packet).unwrap(), "test");
    }

    #[test]
    fn data_round_trip() {
        let mut buf = Vec::new();
        encode_data(&mut buf, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let (packet, _) = one(&buf);
        assert_eq!(decode_data(&packet).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn back_to_back_packets() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 1);
        encode_string(&mut buf, "x");
        let (first, consumed) = one(&buf);
        assert_eq!(decode_u64(&first).unwrap(), 1);
        let (second, consumed2) = one(&buf[consumed..]);
        assert_eq!(decode_string(&second).unwrap(), "x");
        assert_eq!(consumed + consumed2, buf.len());
    }

    #[test]
    fn incomplete_header_is_not_an_error() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 9);
        assert_eq!(split_front(&buf[..3]).unwrap(), None);
    }

    #[test]
    fn incomplete_payload_is_not_an_error() {
        let mut buf = Vec::new();
        encode_data(&mut buf, &[1, 2, 3, 4]);
        assert_eq!(split_front(&buf[..buf.len() - 1]).unwrap(), None);
    }

    #[test]
    fn unknown_type_rejected() {
        let buf = [0xEEu8, 0, 0, 0, 0];
        assert_eq!(split_front(&buf), Err(PacketError::UnknownType(0xEE)));
    }

    #[test]
    fn fixed_width_mismatch_rejected() {
        // UINT64 with a declared length of 4.
        let buf = [PacketType::Uint64 as u8, 0, 0, 0, 4, 1, 2, 3, 4];
        assert_eq!(
            split_front(&buf),
            Err(PacketError::UnexpectedSize {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn oversized_declaration_rejected() {
        let mut buf = vec![PacketType::DataPacket as u8];
        buf.extend_from_slice(&(MAX_PAYLOAD + 1).to_be_bytes());
        assert_eq!(
            split_front(&buf),
            Err(PacketError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn type_mismatch_on_decode() {
        let mut buf = Vec::new();
        encode_string(&mut buf, "nope");
        let (packet, _) = one(&buf);
        assert!(matches!(
            decode_u64(&packet),
            Err(PacketError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn invalid_utf8_string() {
        let mut buf = Vec::new();
        encode(&mut buf, PacketType::String, &[0xFF, 0xFE]);
        let (packet, _) = one(&buf);
        assert_eq!(decode_string(&packet), Err(PacketError::InvalidString));
    }
}
