//! Auth service wire API.
//!
//! The supervisor hands the auth service its identity at startup: the agent
//! identifier and the agent key pair. Key establishment for peer sessions
//! happens inside the auth service and is not part of this codec.

use crate::inet::{put_u32, take_id, take_u32};
use crate::mem::WipingBuf;
use thiserror::Error;

/// Method identifier for the initialize request.
pub const METHOD_INITIALIZE: u32 = 0x0000_0001;

/// Auth service codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthCodecError {
    /// The payload size did not match the layout.
    #[error("invalid payload size")]
    InvalidSize,

    /// The method identifier is not part of the API.
    #[error("unknown method id 0x{0:08x}")]
    UnknownMethod(u32),
}

/// The initialize request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeRequest {
    /// The agent's 16-byte identifier.
    pub agent_id: [u8; 16],
    /// The agent's public key.
    pub public_key: WipingBuf,
    /// The agent's private key.
    pub private_key: WipingBuf,
}

impl InitializeRequest {
    /// Serializes the request.
    ///
    /// Key material carries an explicit length word so the codec does not
    /// depend on the registered crypto suite's key sizes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(4 + 16 + 8 + self.public_key.len() + self.private_key.len());
        put_u32(&mut out, METHOD_INITIALIZE);
        out.extend_from_slice(&self.agent_id);
        put_u32(&mut out, self.public_key.len() as u32);
        out.extend_from_slice(self.public_key.as_slice());
        put_u32(&mut out, self.private_key.len() as u32);
        out.extend_from_slice(self.private_key.as_slice());
        out
    }

    /// Parses a request.
    pub fn decode(raw: &[u8]) -> Result<InitializeRequest, AuthCodecError> {
        let (method, rest) = take_u32(raw).ok_or(AuthCodecError::InvalidSize)?;
        if method != METHOD_INITIALIZE {
            return Err(AuthCodecError::UnknownMethod(method));
        }
        let (agent_id, rest) = take_id(rest).ok_or(AuthCodecError::InvalidSize)?;
        let (public_key, rest) = take_keyed(rest)?;
        let (private_key, rest) = take_keyed(rest)?;
        if !rest.is_empty() {
            return Err(AuthCodecError::InvalidSize);
        }
        Ok(InitializeRequest {
            agent_id,
            public_key,
            private_key,
        })
    }
}

/// Serializes an initialize response.
pub fn encode_response(status: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    put_u32(&mut out, METHOD_INITIALIZE);
    put_u32(&mut out, status);
    out
}

/// Parses an initialize response, returning the status.
pub fn decode_response(raw: &[u8]) -> Result<u32, AuthCodecError> {
    let (method, rest) = take_u32(raw).ok_or(AuthCodecError::InvalidSize)?;
    if method != METHOD_INITIALIZE {
        return Err(AuthCodecError::UnknownMethod(method));
    }
    let (status, rest) = take_u32(rest).ok_or(AuthCodecError::InvalidSize)?;
    if !rest.is_empty() {
        return Err(AuthCodecError::InvalidSize);
    }
    Ok(status)
}

fn take_keyed(raw: &[u8]) -> Result<(WipingBuf, &[u8]), AuthCodecError> {
    let (len, rest) = take_u32(raw).ok_or(AuthCodecError::InvalidSize)?;
    let (key, rest) = rest
        .split_at_checked(len as usize)
        .ok_or(AuthCodecError::InvalidSize)?;
    Ok((key.into(), rest))
}
