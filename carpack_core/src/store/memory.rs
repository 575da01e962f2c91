//! In-memory block store.

use super::{BlockIter, BlockSource, BlockStore};
use crate::block::Block;
use crate::error::Result;
use bytes::Bytes;
use cid::Cid;
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Blocks held in a map keyed by CID, iterated in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<IndexMap<Cid, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Drop a block. Returns whether it was present.
    pub fn remove(&self, cid: &Cid) -> bool {
        self.blocks.write().shift_remove(cid).is_some()
    }

    /// Replace the bytes stored under `cid` without any checks.
    ///
    /// Only useful to simulate corruption.
    pub fn overwrite(&self, cid: Cid, bytes: impl Into<Bytes>) {
        self.blocks.write().insert(cid, bytes.into());
    }
}

impl BlockSource for MemoryStore {
    fn get(&self, cid: &Cid) -> Result<Option<Block>> {
        Ok(self
            .blocks
            .read()
            .get(cid)
            .map(|bytes| Block::new(*cid, bytes.clone())))
    }
}

impl BlockStore for MemoryStore {
    fn put(&self, block: Block) -> Result<Block> {
        self.blocks
            .write()
            .entry(*block.cid())
            .or_insert_with(|| block.bytes().clone());
        Ok(block)
    }

    fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().contains_key(cid))
    }

    fn blocks(&self) -> Result<BlockIter<'_>> {
        // Snapshot so the lock is not held while the caller iterates.
        let snapshot: Vec<Block> = self
            .blocks
            .read()
            .iter()
            .map(|(cid, bytes)| Block::new(*cid, bytes.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use std::sync::Arc;

    #[test]
    fn test_contract() {
        contract::put_get_has(&MemoryStore::new());
        contract::idempotent_put(&MemoryStore::new());
        contract::iterates_in_insertion_order(&MemoryStore::new());
        contract::concurrent_puts(Arc::new(MemoryStore::new()));
        contract::close_is_idempotent(&MemoryStore::new());
    }

    #[test]
    fn test_remove_and_overwrite() {
        let store = MemoryStore::new();
        let block = contract::raw(b"payload");
        store.put(block.clone()).unwrap();
        assert_eq!(store.len(), 1);

        store.overwrite(*block.cid(), &b"corrupt"[..]);
        let stored = store.get(block.cid()).unwrap().unwrap();
        assert!(stored.verify().is_err());

        assert!(store.remove(block.cid()));
        assert!(!store.remove(block.cid()));
        assert!(store.is_empty());
    }
}
