//! The block store boundary.
//!
//! The on-disk database is an external collaborator; the data service
//! talks to it through [`BlockStore`]. [`MemoryStore`] is the in-process
//! implementation used by the default build and the tests: a transaction
//! process queue, a height-ordered block chain with linked transactions,
//! artifact projections, and the global settings table.

use agentd_wire::dataservice::node::{
    ArtifactRecord, BlockNode, NodeId, REF_BEGINNING, REF_END, TransactionNode,
};
use agentd_wire::mem::WipingBuf;
use std::collections::HashMap;
use thiserror::Error;

/// Store failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No record under that key.
    #[error("record not found")]
    NotFound,

    /// A record with that identifier already exists.
    #[error("record already exists")]
    Duplicate,

    /// The operation does not apply to the record's current state.
    #[error("operation not applicable")]
    Invalid,
}

/// Operations the data service needs from the underlying store.
pub trait BlockStore {
    /// Identifier of the highest block, if any block exists.
    fn latest_block_id(&self) -> Option<NodeId>;

    /// Identifier of the block at `height` (heights start at 1).
    fn block_id_by_height(&self, height: u64) -> Option<NodeId>;

    /// Full block record by identifier.
    fn block_by_id(&self, id: &NodeId) -> Option<BlockNode>;

    /// A queued transaction by identifier, with its queue linkage.
    fn queued_transaction(&self, id: &NodeId) -> Option<TransactionNode>;

    /// The head of the process queue.
    fn first_queued_transaction(&self) -> Option<TransactionNode>;

    /// A canonized transaction with its in-block linkage.
    fn canonized_transaction(&self, id: &NodeId) -> Option<TransactionNode>;

    /// Appends a transaction to the process queue.
    fn submit_transaction(
        &mut self,
        txn_id: NodeId,
        artifact_id: NodeId,
        cert: &[u8],
    ) -> Result<(), StoreError>;

    /// Marks a queued transaction ready for the next block.
    fn promote_transaction(&mut self, txn_id: &NodeId) -> Result<(), StoreError>;

    /// Writes a block holding every promoted transaction, removing them
    /// from the queue and updating artifact projections.
    fn write_block(&mut self, block_id: NodeId, cert: &[u8]) -> Result<(), StoreError>;

    /// Reads a global setting.
    fn global_setting(&self, key: u64) -> Option<Vec<u8>>;

    /// Writes a global setting.
    fn set_global_setting(&mut self, key: u64, value: &[u8]) -> Result<(), StoreError>;

    /// Reads an artifact projection.
    fn artifact(&self, id: &NodeId) -> Option<ArtifactRecord>;
}

#[derive(Debug, Clone)]
struct QueuedTxn {
    txn_id: NodeId,
    artifact_id: NodeId,
    cert: Vec<u8>,
    promoted: bool,
}

#[derive(Debug, Clone)]
struct StoredBlock {
    block_id: NodeId,
    cert: Vec<u8>,
    txn_ids: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct CanonTxn {
    artifact_id: NodeId,
    block_id: NodeId,
    prev_id: NodeId,
    next_id: NodeId,
    cert: Vec<u8>,
}

/// In-memory [`BlockStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queue: Vec<QueuedTxn>,
    blocks: Vec<StoredBlock>,
    canonized: HashMap<NodeId, CanonTxn>,
    artifacts: HashMap<NodeId, ArtifactRecord>,
    settings: HashMap<u64, Vec<u8>>,
}

impl MemoryStore {
    /// Opens the store. The data directory names the dataset; the memory
    /// store keeps everything in process.
    pub fn open(_data_dir: &str) -> MemoryStore {
        MemoryStore::default()
    }

    fn queue_node(&self, index: usize) -> TransactionNode {
        let entry = &self.queue[index];
        let prev_id = if index == 0 {
            REF_BEGINNING
        } else {
            self.queue[index - 1].txn_id
        };
        let next_id = if index + 1 == self.queue.len() {
            REF_END
        } else {
            self.queue[index + 1].txn_id
        };
        TransactionNode {
            txn_id: entry.txn_id,
            prev_id,
            next_id,
            artifact_id: entry.artifact_id,
            // Queued transactions are not in any block yet.
            block_id: REF_BEGINNING,
            cert: WipingBuf::from(entry.cert.as_slice()),
        }
    }

    fn touch_artifact(&mut self, artifact_id: NodeId, txn_id: NodeId, height: u64) {
        self.artifacts
            .entry(artifact_id)
            .and_modify(|rec| {
                rec.txn_latest = txn_id;
                rec.height_latest = height;
                rec.state_latest += 1;
            })
            .or_insert(ArtifactRecord {
                artifact_id,
                txn_first: txn_id,
                txn_latest: txn_id,
                height_first: height,
                height_latest: height,
                state_latest: 0,
            });
    }
}

impl BlockStore for MemoryStore {
    fn latest_block_id(&self) -> Option<NodeId> {
        self.blocks.last().map(|b| b.block_id)
    }

    fn block_id_by_height(&self, height: u64) -> Option<NodeId> {
        if height == 0 {
            return None;
        }
        self.blocks.get(height as usize - 1).map(|b| b.block_id)
    }

    fn block_by_id(&self, id: &NodeId) -> Option<BlockNode> {
        let index = self.blocks.iter().position(|b| b.block_id == *id)?;
        let block = &self.blocks[index];
        let prev_id = if index == 0 {
            REF_BEGINNING
        } else {
            self.blocks[index - 1].block_id
        };
        let next_id = if index + 1 == self.blocks.len() {
            REF_END
        } else {
            self.blocks[index + 1].block_id
        };
        Some(BlockNode {
            block_id: block.block_id,
            prev_id,
            next_id,
            first_txn_id: block.txn_ids.first().copied().unwrap_or(REF_END),
            height: index as u64 + 1,
            cert: WipingBuf::from(block.cert.as_slice()),
        })
    }

    fn queued_transaction(&self, id: &NodeId) -> Option<TransactionNode> {
        let index = self.queue.iter().position(|t| t.txn_id == *id)?;
        Some(self.queue_node(index))
    }

    fn first_queued_transaction(&self) -> Option<TransactionNode> {
        if self.queue.is_empty() {
            None
        } else {
            Some(self.queue_node(0))
        }
    }

    fn submit_transaction(
        &mut self,
        txn_id: NodeId,
        artifact_id: NodeId,
        cert: &[u8],
    ) -> Result<(), StoreError> {
        if self.queue.iter().any(|t| t.txn_id == txn_id) || self.canonized.contains_key(&txn_id) {
            return Err(StoreError::Duplicate);
        }
        self.queue.push(QueuedTxn {
            txn_id,
            artifact_id,
            cert: cert.to_vec(),
            promoted: false,
        });
        Ok(())
    }

    fn promote_transaction(&mut self, txn_id: &NodeId) -> Result<(), StoreError> {
        let entry = self
            .queue
            .iter_mut()
            .find(|t| t.txn_id == *txn_id)
            .ok_or(StoreError::NotFound)?;
        if entry.promoted {
            return Err(StoreError::Invalid);
        }
        entry.promoted = true;
        Ok(())
    }

    fn write_block(&mut self, block_id: NodeId, cert: &[u8]) -> Result<(), StoreError> {
        if self.blocks.iter().any(|b| b.block_id == block_id) {
            return Err(StoreError::Duplicate);
        }

        let members: Vec<QueuedTxn> = self.queue.iter().filter(|t| t.promoted).cloned().collect();
        if members.is_empty() {
            return Err(StoreError::Invalid);
        }
        self.queue.retain(|t| !t.promoted);

        let height = self.blocks.len() as u64 + 1;
        let txn_ids: Vec<NodeId> = members.iter().map(|t| t.txn_id).collect();

        for (i, member) in members.iter().enumerate() {
            let prev_id = if i == 0 {
                REF_BEGINNING
            } else {
                members[i - 1].txn_id
            };
            let next_id = if i + 1 == members.len() {
                REF_END
            } else {
                members[i + 1].txn_id
            };
            self.canonized.insert(
                member.txn_id,
                CanonTxn {
                    artifact_id: member.artifact_id,
                    block_id,
                    prev_id,
                    next_id,
                    cert: member.cert.clone(),
                },
            );
            self.touch_artifact(member.artifact_id, member.txn_id, height);
        }

        self.blocks.push(StoredBlock {
            block_id,
            cert: cert.to_vec(),
            txn_ids,
        });
        Ok(())
    }

    fn global_setting(&self, key: u64) -> Option<Vec<u8>> {
        self.settings.get(&key).cloned()
    }

    fn set_global_setting(&mut self, key: u64, value: &[u8]) -> Result<(), StoreError> {
        self.settings.insert(key, value.to_vec());
        Ok(())
    }

    fn artifact(&self, id: &NodeId) -> Option<ArtifactRecord> {
        self.artifacts.get(id).copied()
    }

    fn canonized_transaction(&self, id: &NodeId) -> Option<TransactionNode> {
        let txn = self.canonized.get(id)?;
        Some(TransactionNode {
            txn_id: *id,
            prev_id: txn.prev_id,
            next_id: txn.next_id,
            artifact_id: txn.artifact_id,
            block_id: txn.block_id,
            cert: WipingBuf::from(txn.cert.as_slice()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> NodeId {
        [b; 16]
    }

    #[test]
    fn empty_store_has_nothing() {
        let store = MemoryStore::open("data");
        assert!(store.latest_block_id().is_none());
        assert!(store.first_queued_transaction().is_none());
        assert!(store.block_id_by_height(1).is_none());
        assert!(store.global_setting(1).is_none());
    }

    #[test]
    fn submitted_transaction_is_queued_with_sentinels() {
        let mut store = MemoryStore::open("data");
        store.submit_transaction(id(1), id(0xA), b"cert").unwrap();

        let node = store.first_queued_transaction().unwrap();
        assert_eq!(node.txn_id, id(1));
        assert_eq!(node.prev_id, REF_BEGINNING);
        assert_eq!(node.next_id, REF_END);
        assert_eq!(node.block_id, REF_BEGINNING);
        assert_eq!(node.cert.as_slice(), b"cert");
    }

    #[test]
    fn queue_linkage_tracks_order() {
        let mut store = MemoryStore::open("data");
        store.submit_transaction(id(1), id(0xA), b"a").unwrap();
        store.submit_transaction(id(2), id(0xB), b"b").unwrap();
        store.submit_transaction(id(3), id(0xC), b"c").unwrap();

        let middle = store.queued_transaction(&id(2)).unwrap();
        assert_eq!(middle.prev_id, id(1));
        assert_eq!(middle.next_id, id(3));
    }

    #[test]
    fn duplicate_submission_rejected() {
        let mut store = MemoryStore::open("data");
        store.submit_transaction(id(1), id(0xA), b"a").unwrap();
        assert_eq!(
            store.submit_transaction(id(1), id(0xA), b"a"),
            Err(StoreError::Duplicate)
        );
    }

    #[test]
    fn promote_unknown_transaction_fails() {
        let mut store = MemoryStore::open("data");
        assert_eq!(store.promote_transaction(&id(9)), Err(StoreError::NotFound));
    }

    #[test]
    fn double_promote_fails() {
        let mut store = MemoryStore::open("data");
        store.submit_transaction(id(1), id(0xA), b"a").unwrap();
        store.promote_transaction(&id(1)).unwrap();
        assert_eq!(store.promote_transaction(&id(1)), Err(StoreError::Invalid));
    }

    #[test]
    fn block_write_moves_promoted_transactions() {
        let mut store = MemoryStore::open("data");
        store.submit_transaction(id(1), id(0xA), b"a").unwrap();
        store.submit_transaction(id(2), id(0xB), b"b").unwrap();
        store.promote_transaction(&id(1)).unwrap();

        store.write_block(id(0x10), b"block-cert").unwrap();

        // The promoted transaction left the queue; the other stayed.
        assert!(store.queued_transaction(&id(1)).is_none());
        assert!(store.queued_transaction(&id(2)).is_some());

        // The chain now has one block at height 1.
        assert_eq!(store.latest_block_id(), Some(id(0x10)));
        assert_eq!(store.block_id_by_height(1), Some(id(0x10)));

        let block = store.block_by_id(&id(0x10)).unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.prev_id, REF_BEGINNING);
        assert_eq!(block.next_id, REF_END);
        assert_eq!(block.first_txn_id, id(1));

        // The canonized transaction is linked into the block.
        let txn = store.canonized_transaction(&id(1)).unwrap();
        assert_eq!(txn.block_id, id(0x10));
        assert_eq!(txn.prev_id, REF_BEGINNING);
        assert_eq!(txn.next_id, REF_END);
    }

    #[test]
    fn block_write_without_promotions_fails() {
        let mut store = MemoryStore::open("data");
        store.submit_transaction(id(1), id(0xA), b"a").unwrap();
        assert_eq!(
            store.write_block(id(0x10), b"cert"),
            Err(StoreError::Invalid)
        );
    }

    #[test]
    fn chain_links_blocks_by_height() {
        let mut store = MemoryStore::open("data");
        for (txn, block) in [(1u8, 0x10u8), (2, 0x20)] {
            store.submit_transaction(id(txn), id(0xA), b"c").unwrap();
            store.promote_transaction(&id(txn)).unwrap();
            store.write_block(id(block), b"bc").unwrap();
        }

        let first = store.block_by_id(&id(0x10)).unwrap();
        let second = store.block_by_id(&id(0x20)).unwrap();
        assert_eq!(first.next_id, id(0x20));
        assert_eq!(second.prev_id, id(0x10));
        assert_eq!(second.height, 2);
        assert_eq!(store.latest_block_id(), Some(id(0x20)));
    }

    #[test]
    fn artifacts_track_first_and_latest_touch() {
        let mut store = MemoryStore::open("data");
        for (txn, block) in [(1u8, 0x10u8), (2, 0x20)] {
            store.submit_transaction(id(txn), id(0xA), b"c").unwrap();
            store.promote_transaction(&id(txn)).unwrap();
            store.write_block(id(block), b"bc").unwrap();
        }

        let artifact = store.artifact(&id(0xA)).unwrap();
        assert_eq!(artifact.txn_first, id(1));
        assert_eq!(artifact.txn_latest, id(2));
        assert_eq!(artifact.height_first, 1);
        assert_eq!(artifact.height_latest, 2);
        assert_eq!(artifact.state_latest, 1);
    }

    #[test]
    fn global_settings_round_trip() {
        let mut store = MemoryStore::open("data");
        store.set_global_setting(7, b"value").unwrap();
        assert_eq!(store.global_setting(7), Some(b"value".to_vec()));
        store.set_global_setting(7, b"newer").unwrap();
        assert_eq!(store.global_setting(7), Some(b"newer".to_vec()));
    }
}
