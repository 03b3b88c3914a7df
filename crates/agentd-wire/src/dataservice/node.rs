//! Node payload types and identifier sentinels.
//!
//! Blocks and transactions are doubly-linked on the wire through 16-byte
//! identifiers. An all-zero identifier marks the beginning of a list; an
//! all-0xFF identifier marks its end. Both tests are constant-time.

use super::CodecError;
use crate::inet::{take_id, take_u32, take_u64};
use crate::mem::{WipingBuf, ct_eq};

/// A 16-byte raw identifier.
pub type NodeId = [u8; 16];

/// The beginning-of-list sentinel.
pub const REF_BEGINNING: NodeId = [0u8; 16];

/// The end-of-list sentinel.
pub const REF_END: NodeId = [0xFFu8; 16];

/// True if the reference is the beginning-of-list sentinel.
pub fn node_ref_is_beginning(idref: &NodeId) -> bool {
    ct_eq(idref, &REF_BEGINNING)
}

/// True if the reference is the end-of-list sentinel.
pub fn node_ref_is_end(idref: &NodeId) -> bool {
    ct_eq(idref, &REF_END)
}

/// A block record as carried in a block-read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    /// The block's identifier.
    pub block_id: NodeId,
    /// Previous block in the chain, or the beginning sentinel.
    pub prev_id: NodeId,
    /// Next block in the chain, or the end sentinel.
    pub next_id: NodeId,
    /// First transaction certified by this block.
    pub first_txn_id: NodeId,
    /// Height of this block.
    pub height: u64,
    /// The block certificate.
    pub cert: WipingBuf,
}

impl BlockNode {
    /// Emits the response-body layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 * 4 + 8 + self.cert.len());
        out.extend_from_slice(&self.block_id);
        out.extend_from_slice(&self.prev_id);
        out.extend_from_slice(&self.next_id);
        out.extend_from_slice(&self.first_txn_id);
        out.extend_from_slice(&self.height.to_be_bytes());
        out.extend_from_slice(self.cert.as_slice());
        out
    }

    /// Parses the response-body layout.
    pub fn from_bytes(raw: &[u8]) -> Result<BlockNode, CodecError> {
        let (block_id, rest) = take_id(raw).ok_or(CodecError::InvalidSize)?;
        let (prev_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (next_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (first_txn_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (height, cert) = take_u64(rest).ok_or(CodecError::InvalidSize)?;
        Ok(BlockNode {
            block_id,
            prev_id,
            next_id,
            first_txn_id,
            height,
            cert: cert.into(),
        })
    }
}

/// A transaction record as carried in a transaction-read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionNode {
    /// The transaction's identifier.
    pub txn_id: NodeId,
    /// Previous transaction in the queue or block, or the beginning sentinel.
    pub prev_id: NodeId,
    /// Next transaction in the queue or block, or the end sentinel.
    pub next_id: NodeId,
    /// Artifact this transaction operates on.
    pub artifact_id: NodeId,
    /// Block holding this transaction, or the beginning sentinel while
    /// queued.
    pub block_id: NodeId,
    /// The transaction certificate.
    pub cert: WipingBuf,
}

impl TransactionNode {
    /// Emits the response-body layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 * 5 + self.cert.len());
        out.extend_from_slice(&self.txn_id);
        out.extend_from_slice(&self.prev_id);
        out.extend_from_slice(&self.next_id);
        out.extend_from_slice(&self.artifact_id);
        out.extend_from_slice(&self.block_id);
        out.extend_from_slice(self.cert.as_slice());
        out
    }

    /// Parses the response-body layout.
    pub fn from_bytes(raw: &[u8]) -> Result<TransactionNode, CodecError> {
        let (txn_id, rest) = take_id(raw).ok_or(CodecError::InvalidSize)?;
        let (prev_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (next_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (artifact_id, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (block_id, cert) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        Ok(TransactionNode {
            txn_id,
            prev_id,
            next_id,
            artifact_id,
            block_id,
            cert: cert.into(),
        })
    }
}

/// An artifact record as carried in an artifact-read response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// The artifact's identifier.
    pub artifact_id: NodeId,
    /// First transaction to touch this artifact.
    pub txn_first: NodeId,
    /// Latest transaction to touch this artifact.
    pub txn_latest: NodeId,
    /// Height at which the artifact first appeared.
    pub height_first: u64,
    /// Height of the latest touch.
    pub height_latest: u64,
    /// State word of the latest transaction.
    pub state_latest: u32,
}

impl ArtifactRecord {
    /// Exact response-body size for an artifact record.
    pub const SIZE: usize = 16 * 3 + 8 * 2 + 4;

    /// Emits the response-body layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.artifact_id);
        out.extend_from_slice(&self.txn_first);
        out.extend_from_slice(&self.txn_latest);
        out.extend_from_slice(&self.height_first.to_be_bytes());
        out.extend_from_slice(&self.height_latest.to_be_bytes());
        out.extend_from_slice(&self.state_latest.to_be_bytes());
        out
    }

    /// Parses the response-body layout.
    pub fn from_bytes(raw: &[u8]) -> Result<ArtifactRecord, CodecError> {
        if raw.len() != Self::SIZE {
            return Err(CodecError::InvalidSize);
        }
        let (artifact_id, rest) = take_id(raw).ok_or(CodecError::InvalidSize)?;
        let (txn_first, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (txn_latest, rest) = take_id(rest).ok_or(CodecError::InvalidSize)?;
        let (height_first, rest) = take_u64(rest).ok_or(CodecError::InvalidSize)?;
        let (height_latest, rest) = take_u64(rest).ok_or(CodecError::InvalidSize)?;
        let (state_latest, _) = take_u32(rest).ok_or(CodecError::InvalidSize)?;
        Ok(ArtifactRecord {
            artifact_id,
            txn_first,
            txn_latest,
            height_first,
            height_latest,
            state_latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beginning_sentinel() {
        assert!(node_ref_is_beginning(&[0u8; 16]));
        assert!(!node_ref_is_beginning(&[0xFFu8; 16]));
    }

    #[test]
    fn end_sentinel() {
        assert!(node_ref_is_end(&[0xFFu8; 16]));
        assert!(!node_ref_is_end(&[0u8; 16]));
    }

    #[test]
    fn other_values_are_neither() {
        let mut id = [0u8; 16];
        id[7] = 1;
        assert!(!node_ref_is_beginning(&id));
        assert!(!node_ref_is_end(&id));
    }

    #[test]
    fn block_node_round_trip() {
        let node = BlockNode {
            block_id: [1; 16],
            prev_id: REF_BEGINNING,
            next_id: REF_END,
            first_txn_id: [2; 16],
            height: 42,
            cert: WipingBuf::from(&b"cert-bytes"[..]),
        };
        let parsed = BlockNode::from_bytes(&node.to_bytes()).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn block_node_short_body() {
        assert_eq!(
            BlockNode::from_bytes(&[0u8; 16 * 4 + 7]),
            Err(CodecError::InvalidSize)
        );
    }

    #[test]
    fn transaction_node_round_trip() {
        let node = TransactionNode {
            txn_id: [3; 16],
            prev_id: REF_BEGINNING,
            next_id: REF_END,
            artifact_id: [4; 16],
            block_id: REF_BEGINNING,
            cert: WipingBuf::from(&b"txn-cert"[..]),
        };
        let parsed = TransactionNode::from_bytes(&node.to_bytes()).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn transaction_node_empty_cert() {
        let node = TransactionNode {
            txn_id: [3; 16],
            prev_id: REF_BEGINNING,
            next_id: REF_END,
            artifact_id: [4; 16],
            block_id: REF_BEGINNING,
            cert: WipingBuf::default(),
        };
        let parsed = TransactionNode::from_bytes(&node.to_bytes()).unwrap();
        assert!(parsed.cert.is_empty());
    }

    #[test]
    fn artifact_record_round_trip() {
        let rec = ArtifactRecord {
            artifact_id: [5; 16],
            txn_first: [6; 16],
            txn_latest: [7; 16],
            height_first: 1,
            height_latest: 9,
            state_latest: 3,
        };
        let parsed = ArtifactRecord::from_bytes(&rec.to_bytes()).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn artifact_record_rejects_trailing_bytes() {
        let rec = ArtifactRecord {
            artifact_id: [5; 16],
            txn_first: [6; 16],
            txn_latest: [7; 16],
            height_first: 1,
            height_latest: 9,
            state_latest: 3,
        };
        let mut raw = rec.to_bytes();
        raw.push(0);
        assert_eq!(ArtifactRecord::from_bytes(&raw), Err(CodecError::InvalidSize));
    }
}
