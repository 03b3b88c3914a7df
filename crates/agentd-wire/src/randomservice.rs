//! Random service wire API.
//!
//! One method: fetch `count` random bytes. The offset field lets a caller
//! with multiple outstanding requests match responses to requests.

use crate::inet::{put_u32, take_u32};
use thiserror::Error;

/// Method identifier for the random-bytes request.
pub const METHOD_GET_RANDOM_BYTES: u32 = 0x0000_0001;

/// Largest number of random bytes a single request may ask for.
pub const MAX_RANDOM_BYTES: u32 = 4096;

/// Random service codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RandomCodecError {
    /// The payload size did not match the layout.
    #[error("invalid payload size")]
    InvalidSize,

    /// The method identifier is not part of the API.
    #[error("unknown method id 0x{0:08x}")]
    UnknownMethod(u32),

    /// The byte count was zero or above [`MAX_RANDOM_BYTES`].
    #[error("invalid random byte count {0}")]
    InvalidCount(u32),
}

/// Serializes a random-bytes request.
pub fn encode_request(offset: u32, count: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    put_u32(&mut out, METHOD_GET_RANDOM_BYTES);
    put_u32(&mut out, offset);
    put_u32(&mut out, count);
    out
}

/// Parses a random-bytes request, returning `(offset, count)`.
pub fn decode_request(raw: &[u8]) -> Result<(u32, u32), RandomCodecError> {
    let (method, rest) = take_u32(raw).ok_or(RandomCodecError::InvalidSize)?;
    if method != METHOD_GET_RANDOM_BYTES {
        return Err(RandomCodecError::UnknownMethod(method));
    }
    let (offset, rest) = take_u32(rest).ok_or(RandomCodecError::InvalidSize)?;
    let (count, rest) = take_u32(rest).ok_or(RandomCodecError::InvalidSize)?;
    if !rest.is_empty() {
        return Err(RandomCodecError::InvalidSize);
    }
    if count == 0 || count > MAX_RANDOM_BYTES {
        return Err(RandomCodecError::InvalidCount(count));
    }
    Ok((offset, count))
}

/// Serializes a random-bytes response.
pub fn encode_response(offset: u32, status: u32, bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + bytes.len());
    put_u32(&mut out, METHOD_GET_RANDOM_BYTES);
    put_u32(&mut out, offset);
    put_u32(&mut out, status);
    out.extend_from_slice(bytes);
    out
}

/// Parses a random-bytes response, returning `(offset, status, bytes)`.
pub fn decode_response(raw: &[u8]) -> Result<(u32, u32, &[u8]), RandomCodecError> {
    let (method, rest) = take_u32(raw).ok_or(RandomCodecError::InvalidSize)?;
    if method != METHOD_GET_RANDOM_BYTES {
        return Err(RandomCodecError::UnknownMethod(method));
    }
    let (offset, rest) = take_u32(rest).ok_or(RandomCodecError::InvalidSize)?;
    let (status, bytes) = take_u32(rest).ok_or(RandomCodecError::InvalidSize)?;
    Ok((offset, status, bytes))
}
