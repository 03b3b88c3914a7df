//! Client protocol wire API.
//!
//! The protocol service speaks this API to connected clients over the
//! authenticated transport. Requests are `(method_id:u32_be,
//! request_offset:u32_be, body)`; responses are `(method_id, offset,
//! status, body)` like the data service envelope. The handshake preceding
//! the authenticated channel is the auth service's concern.

use crate::dataservice::node::NodeId;
use crate::inet::{put_u32, put_u64, take_id, take_u32, take_u64};
use thiserror::Error;

/// Protocol method identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProtocolMethod {
    /// Read the latest block id.
    LatestBlockIdGet = 0x0000_0001,
    /// Read the block id at a height.
    BlockIdByHeightGet = 0x0000_0002,
    /// Read a block by id.
    BlockGet = 0x0000_0003,
    /// Read a transaction by id.
    TransactionGet = 0x0000_0004,
    /// Submit a transaction.
    TransactionSubmit = 0x0000_0005,
    /// Close the session.
    Close = 0x0000_0006,
}

impl ProtocolMethod {
    /// Parses a protocol method identifier.
    pub fn from_u32(v: u32) -> Option<ProtocolMethod> {
        match v {
            0x0000_0001 => Some(ProtocolMethod::LatestBlockIdGet),
            0x0000_0002 => Some(ProtocolMethod::BlockIdByHeightGet),
            0x0000_0003 => Some(ProtocolMethod::BlockGet),
            0x0000_0004 => Some(ProtocolMethod::TransactionGet),
            0x0000_0005 => Some(ProtocolMethod::TransactionSubmit),
            0x0000_0006 => Some(ProtocolMethod::Close),
            _ => None,
        }
    }
}

/// Protocol codec failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolCodecError {
    /// The payload size did not match the layout.
    #[error("invalid payload size")]
    InvalidSize,

    /// The method identifier is not part of the API.
    #[error("unknown protocol method id 0x{0:08x}")]
    UnknownMethod(u32),
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolRequest {
    /// Read the latest block id.
    LatestBlockIdGet,
    /// Read the block id at a height.
    BlockIdByHeightGet {
        /// The height to look up.
        height: u64,
    },
    /// Read a block by id.
    BlockGet {
        /// The block to read.
        block_id: NodeId,
    },
    /// Read a transaction by id.
    TransactionGet {
        /// The transaction to read.
        txn_id: NodeId,
    },
    /// Submit a transaction.
    TransactionSubmit {
        /// Identifier of the transaction.
        txn_id: NodeId,
        /// Artifact the transaction operates on.
        artifact_id: NodeId,
        /// The transaction certificate.
        cert: Vec<u8>,
    },
    /// Close the session.
    Close,
}

impl ProtocolRequest {
    /// The method identifier of this request.
    pub fn method(&self) -> ProtocolMethod {
        match self {
            ProtocolRequest::LatestBlockIdGet => ProtocolMethod::LatestBlockIdGet,
            ProtocolRequest::BlockIdByHeightGet { .. } => ProtocolMethod::BlockIdByHeightGet,
            ProtocolRequest::BlockGet { .. } => ProtocolMethod::BlockGet,
            ProtocolRequest::TransactionGet { .. } => ProtocolMethod::TransactionGet,
            ProtocolRequest::TransactionSubmit { .. } => ProtocolMethod::TransactionSubmit,
            ProtocolRequest::Close => ProtocolMethod::Close,
        }
    }

    /// Serializes the request with a caller-chosen request offset.
    pub fn encode(&self, offset: u32) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, self.method() as u32);
        put_u32(&mut out, offset);
        match self {
            ProtocolRequest::LatestBlockIdGet | ProtocolRequest::Close => {}
            ProtocolRequest::BlockIdByHeightGet { height } => {
                put_u64(&mut out, *height);
            }
            ProtocolRequest::BlockGet { block_id } => {
                out.extend_from_slice(block_id);
            }
            ProtocolRequest::TransactionGet { txn_id } => {
                out.extend_from_slice(txn_id);
            }
            ProtocolRequest::TransactionSubmit {
                txn_id,
                artifact_id,
                cert,
            } => {
                out.extend_from_slice(txn_id);
                out.extend_from_slice(artifact_id);
                out.extend_from_slice(cert);
            }
        }
        out
    }

    /// Parses a request, returning it with the caller's request offset.
    pub fn decode(raw: &[u8]) -> Result<(ProtocolRequest, u32), ProtocolCodecError> {
        let (method_id, rest) = take_u32(raw).ok_or(ProtocolCodecError::InvalidSize)?;
        let method = ProtocolMethod::from_u32(method_id)
            .ok_or(ProtocolCodecError::UnknownMethod(method_id))?;
        let (offset, body) = take_u32(rest).ok_or(ProtocolCodecError::InvalidSize)?;

        let request = match method {
            ProtocolMethod::LatestBlockIdGet => {
                expect_empty(body)?;
                ProtocolRequest::LatestBlockIdGet
            }
            ProtocolMethod::BlockIdByHeightGet => {
                let (height, rest) = take_u64(body).ok_or(ProtocolCodecError::InvalidSize)?;
                expect_empty(rest)?;
                ProtocolRequest::BlockIdByHeightGet { height }
            }
            ProtocolMethod::BlockGet => {
                let (block_id, rest) = take_id(body).ok_or(ProtocolCodecError::InvalidSize)?;
                expect_empty(rest)?;
                ProtocolRequest::BlockGet { block_id }
            }
            ProtocolMethod::TransactionGet => {
                let (txn_id, rest) = take_id(body).ok_or(ProtocolCodecError::InvalidSize)?;
                expect_empty(rest)?;
                ProtocolRequest::TransactionGet { txn_id }
            }
            ProtocolMethod::TransactionSubmit => {
                let (txn_id, rest) = take_id(body).ok_or(ProtocolCodecError::InvalidSize)?;
                let (artifact_id, cert) = take_id(rest).ok_or(ProtocolCodecError::InvalidSize)?;
                ProtocolRequest::TransactionSubmit {
                    txn_id,
                    artifact_id,
                    cert: cert.to_vec(),
                }
            }
            ProtocolMethod::Close => {
                expect_empty(body)?;
                ProtocolRequest::Close
            }
        };
        Ok((request, offset))
    }
}

/// Serializes a protocol response.
pub fn encode_response(method: ProtocolMethod, offset: u32, status: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + body.len());
    put_u32(&mut out, method as u32);
    put_u32(&mut out, offset);
    put_u32(&mut out, status);
    out.extend_from_slice(body);
    out
}

/// Parses a protocol response, returning `(method, offset, status, body)`.
pub fn decode_response(raw: &[u8]) -> Result<(ProtocolMethod, u32, u32, &[u8]), ProtocolCodecError> {
    let (method_id, rest) = take_u32(raw).ok_or(ProtocolCodecError::InvalidSize)?;
    let method =
        ProtocolMethod::from_u32(method_id).ok_or(ProtocolCodecError::UnknownMethod(method_id))?;
    let (offset, rest) = take_u32(rest).ok_or(ProtocolCodecError::InvalidSize)?;
    let (status, body) = take_u32(rest).ok_or(ProtocolCodecError::InvalidSize)?;
    Ok((method, offset, status, body))
}

fn expect_empty(rest: &[u8]) -> Result<(), ProtocolCodecError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ProtocolCodecError::InvalidSize)
    }
}
