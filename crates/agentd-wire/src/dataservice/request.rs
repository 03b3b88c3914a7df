//! Request codec.
//!
//! A request is `method_id:u32_be` followed by the method body; child-scoped
//! methods carry `child_index:u32_be` first in the body. Encode and decode
//! are exact inverses so the service-side dispatcher and the client API
//! share one layout definition.

use super::caps::ApiCap;
use super::node::NodeId;
use super::CodecError;
use crate::bitcap::{BITCAP_SIZE, BitCap};
use crate::inet::{put_u32, put_u64, take_id, take_u32, take_u64};

/// Method identifiers.
///
/// Values are part of the wire contract between services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Method {
    /// Open the root context against a data directory.
    RootContextCreate = 0x0000_0001,
    /// Monotonically reduce the root context's capabilities.
    RootContextReduceCaps = 0x0000_0002,
    /// Derive a child context with reduced capabilities.
    ChildContextCreate = 0x0000_0003,
    /// Close a child context.
    ChildContextClose = 0x0000_0004,
    /// Read a global setting.
    GlobalSettingRead = 0x0000_0010,
    /// Write a global setting.
    GlobalSettingWrite = 0x0000_0011,
    /// Read the latest block id.
    BlockIdLatestRead = 0x0000_0020,
    /// Read the block id at a height.
    BlockIdByHeightRead = 0x0000_0021,
    /// Read a block by id.
    BlockRead = 0x0000_0022,
    /// Write a block.
    BlockWrite = 0x0000_0023,
    /// Read a queued transaction by id.
    TransactionRead = 0x0000_0030,
    /// Submit a transaction to the process queue.
    TransactionSubmit = 0x0000_0031,
    /// Read the first queued transaction.
    TransactionFirstRead = 0x0000_0032,
    /// Promote a queued transaction.
    TransactionPromote = 0x0000_0033,
    /// Read an artifact record.
    ArtifactRead = 0x0000_0040,
}

impl Method {
    /// Parses a method identifier.
    pub fn from_u32(v: u32) -> Option<Method> {
        match v {
            0x0000_0001 => Some(Method::RootContextCreate),
            0x0000_0002 => Some(Method::RootContextReduceCaps),
            0x0000_0003 => Some(Method::ChildContextCreate),
            0x0000_0004 => Some(Method::ChildContextClose),
            0x0000_0010 => Some(Method::GlobalSettingRead),
            0x0000_0011 => Some(Method::GlobalSettingWrite),
            0x0000_0020 => Some(Method::BlockIdLatestRead),
            0x0000_0021 => Some(Method::BlockIdByHeightRead),
            0x0000_0022 => Some(Method::BlockRead),
            0x0000_0023 => Some(Method::BlockWrite),
            0x0000_0030 => Some(Method::TransactionRead),
            0x0000_0031 => Some(Method::TransactionSubmit),
            0x0000_0032 => Some(Method::TransactionFirstRead),
            0x0000_0033 => Some(Method::TransactionPromote),
            0x0000_0040 => Some(Method::ArtifactRead),
            _ => None,
        }
    }

    /// The capability bit that authorizes this method.
    ///
    /// Artifact reads are gated by the transaction-read capability; artifact
    /// records are projections of transaction history.
    pub fn required_cap(self) -> ApiCap {
        match self {
            Method::RootContextCreate => ApiCap::RootContextCreate,
            Method::RootContextReduceCaps => ApiCap::RootContextReduceCaps,
            Method::ChildContextCreate => ApiCap::ChildContextCreate,
            Method::ChildContextClose => ApiCap::ChildContextClose,
            Method::GlobalSettingRead => ApiCap::AppGlobalSettingRead,
            Method::GlobalSettingWrite => ApiCap::AppGlobalSettingWrite,
            Method::BlockIdLatestRead => ApiCap::AppBlockIdLatestRead,
            Method::BlockIdByHeightRead => ApiCap::AppBlockIdByHeightRead,
            Method::BlockRead => ApiCap::AppBlockRead,
            Method::BlockWrite => ApiCap::AppBlockWrite,
            Method::TransactionRead => ApiCap::AppTransactionRead,
            Method::TransactionSubmit => ApiCap::AppPqTransactionSubmit,
            Method::TransactionFirstRead => ApiCap::AppPqTransactionFirstRead,
            Method::TransactionPromote => ApiCap::AppPqTransactionPromote,
            Method::ArtifactRead => ApiCap::AppTransactionRead,
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Open the root context.
    RootContextInit {
        /// Data directory, sent as bare bytes with no terminator.
        data_dir: String,
    },
    /// Reduce the root context's capabilities.
    RootContextReduceCaps {
        /// The reduction mask.
        caps: BitCap,
    },
    /// Create a child context.
    ChildContextCreate {
        /// The capability mask for the child.
        caps: BitCap,
    },
    /// Close a child context.
    ChildContextClose {
        /// The child to close.
        child: u32,
    },
    /// Read a global setting.
    GlobalSettingRead {
        /// Issuing child context.
        child: u32,
        /// Setting key.
        key: u64,
    },
    /// Write a global setting.
    GlobalSettingWrite {
        /// Issuing child context.
        child: u32,
        /// Setting key.
        key: u64,
        /// Setting value.
        value: Vec<u8>,
    },
    /// Read the latest block id.
    BlockIdLatestRead {
        /// Issuing child context.
        child: u32,
    },
    /// Read the block id at a height.
    BlockIdByHeightRead {
        /// Issuing child context.
        child: u32,
        /// The height to look up.
        height: u64,
    },
    /// Read a block by id.
    BlockRead {
        /// Issuing child context.
        child: u32,
        /// The block to read.
        block_id: NodeId,
    },
    /// Write a block.
    BlockWrite {
        /// Issuing child context.
        child: u32,
        /// Identifier of the new block.
        block_id: NodeId,
        /// The block certificate.
        cert: Vec<u8>,
    },
    /// Read a queued transaction by id.
    TransactionRead {
        /// Issuing child context.
        child: u32,
        /// The transaction to read.
        txn_id: NodeId,
    },
    /// Submit a transaction to the process queue.
    TransactionSubmit {
        /// Issuing child context.
        child: u32,
        /// Identifier of the transaction.
        txn_id: NodeId,
        /// Artifact the transaction operates on.
        artifact_id: NodeId,
        /// The transaction certificate.
        cert: Vec<u8>,
    },
    /// Read the first queued transaction.
    TransactionFirstRead {
        /// Issuing child context.
        child: u32,
    },
    /// Promote a queued transaction.
    TransactionPromote {
        /// Issuing child context.
        child: u32,
        /// The transaction to promote.
        txn_id: NodeId,
    },
    /// Read an artifact record.
    ArtifactRead {
        /// Issuing child context.
        child: u32,
        /// The artifact to read.
        artifact_id: NodeId,
    },
}

impl Request {
    /// The method identifier of this request.
    pub fn method(&self) -> Method {
        match self {
            Request::RootContextInit { .. } => Method::RootContextCreate,
            Request::RootContextReduceCaps { .. } => Method::RootContextReduceCaps,
            Request::ChildContextCreate { .. } => Method::ChildContextCreate,
            Request::ChildContextClose { .. } => Method::ChildContextClose,
            Request::GlobalSettingRead { .. } => Method::GlobalSettingRead,
            Request::GlobalSettingWrite { .. } => Method::GlobalSettingWrite,
            Request::BlockIdLatestRead { .. } => Method::BlockIdLatestRead,
            Request::BlockIdByHeightRead { .. } => Method::BlockIdByHeightRead,
            Request::BlockRead { .. } => Method::BlockRead,
            Request::BlockWrite { .. } => Method::BlockWrite,
            Request::TransactionRead { .. } => Method::TransactionRead,
            Request::TransactionSubmit { .. } => Method::TransactionSubmit,
            Request::TransactionFirstRead { .. } => Method::TransactionFirstRead,
            Request::TransactionPromote { .. } => Method::TransactionPromote,
            Request::ArtifactRead { .. } => Method::ArtifactRead,
        }
    }

    /// The child-index offset this request addresses, or zero for
    /// root-level methods.
    pub fn offset(&self) -> u32 {
        match self {
            Request::RootContextInit { .. }
            | Request::RootContextReduceCaps { .. }
            | Request::ChildContextCreate { .. } => 0,
            Request::ChildContextClose { child }
            | Request::GlobalSettingRead { child, .. }
            | Request::GlobalSettingWrite { child, .. }
            | Request::BlockIdLatestRead { child }
            | Request::BlockIdByHeightRead { child, .. }
            | Request::BlockRead { child, .. }
            | Request::BlockWrite { child, .. }
            | Request::TransactionRead { child, .. }
            | Request::TransactionSubmit { child, .. }
            | Request::TransactionFirstRead { child }
            | Request::TransactionPromote { child, .. }
            | Request::ArtifactRead { child, .. } => *child,
        }
    }

    /// Serializes the request.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        put_u32(&mut out, self.method() as u32);
        match self {
            Request::RootContextInit { data_dir } => {
                out.extend_from_slice(data_dir.as_bytes());
            }
            Request::RootContextReduceCaps { caps } | Request::ChildContextCreate { caps } => {
                out.extend_from_slice(&caps.to_bytes());
            }
            Request::ChildContextClose { child }
            | Request::BlockIdLatestRead { child }
            | Request::TransactionFirstRead { child } => {
                put_u32(&mut out, *child);
            }
            Request::GlobalSettingRead { child, key } => {
                put_u32(&mut out, *child);
                put_u64(&mut out, *key);
            }
            Request::GlobalSettingWrite { child, key, value } => {
                put_u32(&mut out, *child);
                put_u64(&mut out, *key);
                out.extend_from_slice(value);
            }
            Request::BlockIdByHeightRead { child, height } => {
                put_u32(&mut out, *child);
                put_u64(&mut out, *height);
            }
            Request::BlockRead { child, block_id } => {
                put_u32(&mut out, *child);
                out.extend_from_slice(block_id);
            }
            Request::BlockWrite {
                child,
                block_id,
                cert,
            } => {
                put_u32(&mut out, *child);
                out.extend_from_slice(block_id);
                out.extend_from_slice(cert);
            }
            Request::TransactionRead { child, txn_id }
            | Request::TransactionPromote { child, txn_id } => {
                put_u32(&mut out, *child);
                out.extend_from_slice(txn_id);
            }
            Request::TransactionSubmit {
                child,
                txn_id,
                artifact_id,
                cert,
            } => {
                put_u32(&mut out, *child);
                out.extend_from_slice(txn_id);
                out.extend_from_slice(artifact_id);
                out.extend_from_slice(cert);
            }
            Request::ArtifactRead { child, artifact_id } => {
                put_u32(&mut out, *child);
                out.extend_from_slice(artifact_id);
            }
        }
        out
    }

    /// Parses a request.
    pub fn decode(raw: &[u8]) -> Result<Request, CodecError> {
        let (method_id, body) = take_u32(raw).ok_or(CodecError::InvalidSize)?;
        let method = Method::from_u32(method_id).ok_or(CodecError::UnknownMethod(method_id))?;

        match method {
            Method::RootContextCreate => {
                let data_dir =
                    String::from_utf8(body.to_vec()).map_err(|_| CodecError::InvalidParameter)?;
                Ok(Request::RootContextInit { data_dir })
            }
            Method::RootContextReduceCaps => {
                let caps = decode_caps(body)?;
                Ok(Request::RootContextReduceCaps { caps })
            }
            Method::ChildContextCreate => {
                let caps = decode_caps(body)?;
                Ok(Request::ChildContextCreate { caps })
            }
            Method::ChildContextClose => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::ChildContextClose { child })
            }
            Method::GlobalSettingRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (key, rest) = take_u64(rest).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::GlobalSettingRead { child, key })
            }
            Method::GlobalSettingWrite => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (key, value) = take_u64(rest).ok_or(CodecError::InvalidSize)?;
                Ok(Request::GlobalSettingWrite {
                    child,
                    key,
                    value: value.to_vec(),
                })
            }
            Method::BlockIdLatestRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::BlockIdLatestRead { child })
            }
            Method::BlockIdByHeightRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (height, rest) = take_u64(rest).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::BlockIdByHeightRead { child, height })
            }
            Method::BlockRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (block_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::BlockRead { child, block_id })
            }
            Method::BlockWrite => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (block_id, cert) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                Ok(Request::BlockWrite {
                    child,
                    block_id,
                    cert: cert.to_vec(),
                })
            }
            Method::TransactionRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (txn_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::TransactionRead { child, txn_id })
            }
            Method::TransactionSubmit => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (txn_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                let (artifact_id, cert) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                Ok(Request::TransactionSubmit {
                    child,
                    txn_id,
                    artifact_id,
                    cert: cert.to_vec(),
                })
            }
            Method::TransactionFirstRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::TransactionFirstRead { child })
            }
            Method::TransactionPromote => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (txn_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::TransactionPromote { child, txn_id })
            }
            Method::ArtifactRead => {
                let (child, rest) = take_u32(body).ok_or(CodecError::InvalidSize)?;
                let (artifact_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
                expect_empty(rest)?;
                Ok(Request::ArtifactRead { child, artifact_id })
            }
        }
    }
}

fn decode_caps(body: &[u8]) -> Result<BitCap, CodecError> {
    if body.len() != BITCAP_SIZE {
        return Err(CodecError::InvalidSize);
    }
    BitCap::from_bytes(body).ok_or(CodecError::InvalidSize)
}

fn expect_empty(rest: &[u8]) -> Result<(), CodecError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(CodecError::InvalidSize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(req: Request) {
        let decoded = Request::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn root_context_init_round_trip() {
        round_trip(Request::RootContextInit {
            data_dir: "/data/blocks".into(),
        });
    }

    #[test]
    fn reduce_caps_round_trip() {
        round_trip(Request::RootContextReduceCaps {
            caps: BitCap::all(),
        });
    }

    #[test]
    fn child_create_round_trip() {
        let mut caps = BitCap::none();
        caps.set(ApiCap::AppBlockRead);
        round_trip(Request::ChildContextCreate { caps });
    }

    #[test]
    fn child_close_round_trip() {
        round_trip(Request::ChildContextClose { child: 7 });
    }

    #[test]
    fn global_setting_round_trips() {
        round_trip(Request::GlobalSettingRead { child: 1, key: 99 });
        round_trip(Request::GlobalSettingWrite {
            child: 1,
            key: 99,
            value: vec![1, 2, 3],
        });
    }

    #[test]
    fn block_round_trips() {
        round_trip(Request::BlockIdLatestRead { child: 2 });
        round_trip(Request::BlockIdByHeightRead { child: 2, height: 5 });
        round_trip(Request::BlockRead {
            child: 2,
            block_id: [9; 16],
        });
        round_trip(Request::BlockWrite {
            child: 2,
            block_id: [9; 16],
            cert: b"block-cert".to_vec(),
        });
    }

    #[test]
    fn transaction_round_trips() {
        round_trip(Request::TransactionRead {
            child: 3,
            txn_id: [8; 16],
        });
        round_trip(Request::TransactionSubmit {
            child: 3,
            txn_id: [8; 16],
            artifact_id: [7; 16],
            cert: b"txn-cert".to_vec(),
        });
        round_trip(Request::TransactionFirstRead { child: 3 });
        round_trip(Request::TransactionPromote {
            child: 3,
            txn_id: [8; 16],
        });
    }

    #[test]
    fn artifact_round_trip() {
        round_trip(Request::ArtifactRead {
            child: 4,
            artifact_id: [6; 16],
        });
    }

    #[test]
    fn reduce_caps_rejects_wrong_size() {
        let mut raw = Vec::new();
        put_u32(&mut raw, Method::RootContextReduceCaps as u32);
        raw.extend_from_slice(&[0u8; BITCAP_SIZE + 1]);
        assert_eq!(Request::decode(&raw), Err(CodecError::InvalidSize));
    }

    #[test]
    fn unknown_method_rejected() {
        let mut raw = Vec::new();
        put_u32(&mut raw, 0xFFFF_FFFF);
        assert_eq!(
            Request::decode(&raw),
            Err(CodecError::UnknownMethod(0xFFFF_FFFF))
        );
    }

    #[test]
    fn truncated_request_rejected() {
        assert_eq!(Request::decode(&[0, 0]), Err(CodecError::InvalidSize));
    }

    #[test]
    fn trailing_garbage_rejected() {
        let mut raw = Request::BlockRead {
            child: 2,
            block_id: [9; 16],
        }
        .encode();
        raw.push(0);
        assert_eq!(Request::decode(&raw), Err(CodecError::InvalidSize));
    }

    #[test]
    fn offset_is_zero_for_root_methods() {
        assert_eq!(
            Request::RootContextInit {
                data_dir: "d".into()
            }
            .offset(),
            0
        );
        assert_eq!(Request::BlockRead { child: 5, block_id: [0; 16] }.offset(), 5);
    }
}
