//! Canonization service control API.
//!
//! The supervisor drives the canonization service over a private control
//! socket: one configure request carrying the block interval and the block
//! transaction cap, then one start request. Responses echo the method with
//! a status.

use crate::inet::{put_u32, put_u64, take_u32, take_u64};
use thiserror::Error;

/// Control method identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlMethod {
    /// Set block interval and per-block transaction cap.
    Configure = 0x0000_0001,
    /// Begin the canonization timer.
    Start = 0x0000_0002,
}

impl ControlMethod {
    /// Parses a control method identifier.
    pub fn from_u32(v: u32) -> Option<ControlMethod> {
        match v {
            0x0000_0001 => Some(ControlMethod::Configure),
            0x0000_0002 => Some(ControlMethod::Start),
            _ => None,
        }
    }
}

/// A decoded control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Configure the canonization pass.
    Configure {
        /// Seconds between canonization passes.
        max_seconds: u64,
        /// Largest number of transactions promoted into one block.
        max_transactions: u64,
    },
    /// Start the canonization timer.
    Start,
}

/// Canonization codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlCodecError {
    /// The payload size did not match the layout.
    #[error("invalid payload size")]
    InvalidSize,

    /// The method identifier is not part of the API.
    #[error("unknown control method id 0x{0:08x}")]
    UnknownMethod(u32),
}

impl ControlRequest {
    /// The method identifier of this request.
    pub fn method(&self) -> ControlMethod {
        match self {
            ControlRequest::Configure { .. } => ControlMethod::Configure,
            ControlRequest::Start => ControlMethod::Start,
        }
    }

    /// Serializes the request.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, self.method() as u32);
        if let ControlRequest::Configure {
            max_seconds,
            max_transactions,
        } = self
        {
            put_u64(&mut out, *max_seconds);
            put_u64(&mut out, *max_transactions);
        }
        out
    }

    /// Parses a request.
    pub fn decode(raw: &[u8]) -> Result<ControlRequest, ControlCodecError> {
        let (method_id, body) = take_u32(raw).ok_or(ControlCodecError::InvalidSize)?;
        let method =
            ControlMethod::from_u32(method_id).ok_or(ControlCodecError::UnknownMethod(method_id))?;
        match method {
            ControlMethod::Configure => {
                let (max_seconds, rest) = take_u64(body).ok_or(ControlCodecError::InvalidSize)?;
                let (max_transactions, rest) =
                    take_u64(rest).ok_or(ControlCodecError::InvalidSize)?;
                if !rest.is_empty() {
                    return Err(ControlCodecError::InvalidSize);
                }
                Ok(ControlRequest::Configure {
                    max_seconds,
                    max_transactions,
                })
            }
            ControlMethod::Start => {
                if !body.is_empty() {
                    return Err(ControlCodecError::InvalidSize);
                }
                Ok(ControlRequest::Start)
            }
        }
    }
}

/// Serializes a control response.
pub fn encode_response(method: ControlMethod, status: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    put_u32(&mut out, method as u32);
    put_u32(&mut out, status);
    out
}

/// Parses a control response, returning `(method, status)`.
pub fn decode_response(raw: &[u8]) -> Result<(ControlMethod, u32), ControlCodecError> {
    let (method_id, rest) = take_u32(raw).ok_or(ControlCodecError::InvalidSize)?;
    let method =
        ControlMethod::from_u32(method_id).ok_or(ControlCodecError::UnknownMethod(method_id))?;
    let (status, rest) = take_u32(rest).ok_or(ControlCodecError::InvalidSize)?;
    if !rest.is_empty() {
        return Err(ControlCodecError::InvalidSize);
    }
    Ok((method, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configure_round_trip() {
        let req = ControlRequest::Configure {
            max_seconds: 5,
            max_transactions: 500,
        };
        assert_eq!(ControlRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn configure_is_twenty_bytes() {
        let req = ControlRequest::Configure {
            max_seconds: 5,
            max_transactions: 500,
        };
        assert_eq!(req.encode().len(), 20);
    }

    #[test]
    fn start_round_trip() {
        let req = ControlRequest::Start;
        assert_eq!(ControlRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn start_rejects_body() {
        let mut raw = ControlRequest::Start.encode();
        raw.push(0);
        assert_eq!(
            ControlRequest::decode(&raw),
            Err(ControlCodecError::InvalidSize)
        );
    }

    #[test]
    fn unknown_method_rejected() {
        let mut raw = Vec::new();
        put_u32(&mut raw, 0x77);
        assert_eq!(
            ControlRequest::decode(&raw),
            Err(ControlCodecError::UnknownMethod(0x77))
        );
    }

    #[test]
    fn response_round_trip() {
        let raw = encode_response(ControlMethod::Start, 0);
        assert_eq!(decode_response(&raw).unwrap(), (ControlMethod::Start, 0));
    }
}
