//! In-memory block storage implementation

use crate::error::Result;
use crate::repo::CommitData;
use crate::storage::{BlockStore, verify_blocks};
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// In-memory block storage using BTreeMap
///
/// Used for tests, for the commit staging overlay, and as the `memory` blockstore
/// variant. Cloning shares the same underlying map.
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Create new empty memory store
    pub fn new() -> Self {
        Self {
            blocks: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Create new memory store from a map of blocks
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.blocks.read().unwrap().is_empty()
    }

    /// Take a copy of every block
    pub fn snapshot(&self) -> BTreeMap<IpldCid, Bytes> {
        self.blocks.read().unwrap().clone()
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().unwrap().get(cid).cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = crate::mst::util::compute_cid(data)?;
        self.blocks
            .write()
            .unwrap()
            .entry(cid)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.blocks.read().unwrap().contains_key(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let blocks = verify_blocks(blocks.into_iter().collect())?;
        let mut store = self.blocks.write().unwrap();
        for (cid, data) in blocks {
            store.entry(cid).or_insert(data);
        }
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let store = self.blocks.read().unwrap();
        Ok(cids.iter().map(|cid| store.get(cid).cloned()).collect())
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        let blocks = verify_blocks(
            commit
                .blocks
                .iter()
                .map(|(cid, data)| (*cid, data.clone()))
                .collect(),
        )?;
        let mut store = self.blocks.write().unwrap();
        store.extend(blocks);
        Ok(())
    }

    async fn delete_unreferenced(&self, cids: &[IpldCid]) -> Result<usize> {
        let mut store = self.blocks.write().unwrap();
        Ok(cids.iter().filter(|cid| store.remove(cid).is_some()).count())
    }
}
