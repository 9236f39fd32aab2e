//! Layered block storage used as a commit staging area
//!
//! Reads check a writable overlay first and fall back to a read-only base. Writes only
//! touch the overlay, so a commit can be assembled (and abandoned) without any of its
//! blocks becoming visible in the base store.

use crate::error::Result;
use crate::repo::CommitData;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::sync::Arc;

/// Layered block storage with a writable overlay and read-only base
#[derive(Debug, Clone)]
pub struct LayeredBlockStore<W: BlockStore, B: BlockStore> {
    writable: W,
    base: Arc<B>,
}

impl<W: BlockStore, B: BlockStore> LayeredBlockStore<W, B> {
    /// Create a new layered storage
    ///
    /// - `writable`: top layer receiving all writes
    /// - `base`: bottom layer for fallback reads
    pub fn new(writable: W, base: Arc<B>) -> Self {
        Self { writable, base }
    }

    /// Get reference to the writable layer
    pub fn writable(&self) -> &W {
        &self.writable
    }

    /// Get reference to the base layer
    pub fn base(&self) -> &Arc<B> {
        &self.base
    }
}

impl<W: BlockStore + Sync + 'static, B: BlockStore + Sync + Send + 'static> BlockStore
    for LayeredBlockStore<W, B>
{
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        if let Some(data) = self.writable.get(cid).await? {
            return Ok(Some(data));
        }
        self.base.get(cid).await
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        self.writable.put(data).await
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        if self.writable.has(cid).await? {
            return Ok(true);
        }
        self.base.has(cid).await
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        self.writable.put_many(blocks).await
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let mut results = self.writable.get_many(cids).await?;
        let missing: Vec<IpldCid> = cids
            .iter()
            .zip(&results)
            .filter(|(_, hit)| hit.is_none())
            .map(|(cid, _)| *cid)
            .collect();
        if missing.is_empty() {
            return Ok(results);
        }

        let mut from_base = self.base.get_many(&missing).await?.into_iter();
        for slot in results.iter_mut().filter(|slot| slot.is_none()) {
            *slot = from_base.next().flatten();
        }
        Ok(results)
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        self.writable.apply_commit(commit).await
    }

    async fn delete_unreferenced(&self, cids: &[IpldCid]) -> Result<usize> {
        // the base is read-only through this view
        self.writable.delete_unreferenced(cids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;

    #[tokio::test]
    async fn reads_fall_through_writes_stay_on_top() {
        let base = Arc::new(MemoryBlockStore::new());
        let base_cid = base.put(b"base block").await.unwrap();

        let layered = LayeredBlockStore::new(MemoryBlockStore::new(), base.clone());
        let top_cid = layered.put(b"staged block").await.unwrap();

        assert!(layered.has(&base_cid).await.unwrap());
        assert!(layered.has(&top_cid).await.unwrap());
        assert!(!base.has(&top_cid).await.unwrap());
        assert_eq!(layered.writable().len(), 1);

        let got = layered.get_many(&[top_cid, base_cid]).await.unwrap();
        assert_eq!(got[0].as_deref(), Some(&b"staged block"[..]));
        assert_eq!(got[1].as_deref(), Some(&b"base block"[..]));
    }

    #[tokio::test]
    async fn get_many_mixed_missing() {
        let base = Arc::new(MemoryBlockStore::new());
        let in_base = base.put(b"in base").await.unwrap();
        let layered = LayeredBlockStore::new(MemoryBlockStore::new(), base);
        let on_top = layered.put(b"on top").await.unwrap();
        let nowhere = crate::mst::util::compute_cid(b"nowhere").unwrap();

        let got = layered
            .get_many(&[nowhere, on_top, in_base, nowhere])
            .await
            .unwrap();
        assert!(got[0].is_none());
        assert!(got[1].is_some());
        assert!(got[2].is_some());
        assert!(got[3].is_none());
    }
}
