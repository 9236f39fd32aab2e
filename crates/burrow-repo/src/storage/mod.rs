//! Block storage abstraction for MST nodes, commits and records

use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use crate::{DAG_CBOR_CID_CODEC, RAW_CID_CODEC, SHA2_256};
use bytes::Bytes;
use cid::Cid as IpldCid;
use sha2::{Digest, Sha256};

/// Async block storage trait
///
/// Durable mapping from content hash to immutable bytes. Backends:
/// - in-memory map ([`MemoryBlockStore`])
/// - embedded `redb` table ([`RedbBlockStore`])
/// - directory object store ([`ObjectBlockStore`])
/// - staging overlay on top of another store ([`LayeredBlockStore`])
///
/// Callers only depend on the CID → bytes contract, never on backend identity.
/// Clone is required so MST can share storage references across tree operations.
///
/// A missing block is `Ok(None)` from [`get`](BlockStore::get), which is distinct from
/// an `Err` of kind `Storage`/`Io`/`Timeout` (transient, retry). Use [`get_required`]
/// when absence is an error.
///
/// # Example
///
/// ```rust,ignore
/// use burrow_repo::storage::{BlockStore, MemoryBlockStore};
///
/// let storage = MemoryBlockStore::new();
/// let cid = storage.put(b"hello world").await?;
/// assert_eq!(storage.get(&cid).await?.as_deref(), Some(&b"hello world"[..]));
/// ```
#[trait_variant::make(Send)]
pub trait BlockStore: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not found.
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>>;

    /// Put a block, return its CID
    ///
    /// The CID is calculated from the data using SHA-256 and the DAG-CBOR codec.
    /// Storing identical bytes twice returns the same CID and is a no-op.
    async fn put(&self, data: &[u8]) -> Result<IpldCid>;

    /// Check if a block exists without retrieving it
    async fn has(&self, cid: &IpldCid) -> Result<bool>;

    /// Put many blocks at once
    ///
    /// Every `(cid, bytes)` pair is re-hashed with [`verify_block`] before anything is
    /// written; a single mismatch rejects the whole batch.
    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()>;

    /// Get multiple blocks at once
    ///
    /// Returns a vec of the same length as the input, with `None` for missing blocks.
    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>>;

    /// Persist the new blocks of a commit
    ///
    /// All-or-nothing where the backend supports it. Removed blocks are not deleted
    /// here; they become garbage-collection candidates instead.
    async fn apply_commit(&self, commit: &CommitData) -> Result<()>;

    /// Delete blocks already proven unreferenced
    ///
    /// Unknown CIDs are ignored. Returns the number of blocks actually removed.
    async fn delete_unreferenced(&self, cids: &[IpldCid]) -> Result<usize>;
}

/// Get a block, treating absence as a `NotFound` error
pub async fn get_required<S: BlockStore + Sync>(storage: &S, cid: &IpldCid) -> Result<Bytes> {
    storage
        .get(cid)
        .await?
        .ok_or_else(|| RepoError::not_found("block", cid))
}

/// Check that `data` hashes to `cid`
///
/// Only sha2-256 multihashes with the DAG-CBOR or raw codec are accepted.
/// Never trust a caller-supplied CID without running this.
pub fn verify_block(cid: &IpldCid, data: &[u8]) -> Result<()> {
    if cid.codec() != DAG_CBOR_CID_CODEC && cid.codec() != RAW_CID_CODEC {
        return Err(RepoError::invalid_cid(format!(
            "unsupported codec 0x{:x} for {}",
            cid.codec(),
            cid
        )));
    }
    let hash = cid.hash();
    if hash.code() != SHA2_256 {
        return Err(RepoError::invalid_cid(format!(
            "unsupported hash 0x{:x} for {}",
            hash.code(),
            cid
        )));
    }
    let digest = Sha256::digest(data);
    if hash.digest() != digest.as_slice() {
        return Err(RepoError::invalid_cid(format!(
            "content does not hash to {}",
            cid
        )));
    }
    Ok(())
}

/// Verify a whole batch before any of it is written
pub(crate) fn verify_blocks(blocks: Vec<(IpldCid, Bytes)>) -> Result<Vec<(IpldCid, Bytes)>> {
    for (cid, data) in &blocks {
        verify_block(cid, data)?;
    }
    Ok(blocks)
}

pub mod embedded;
pub mod layered;
pub mod memory;
pub mod object;

pub use embedded::RedbBlockStore;
pub use layered::LayeredBlockStore;
pub use memory::MemoryBlockStore;
pub use object::ObjectBlockStore;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mst::util::compute_cid;

    #[test]
    fn verify_accepts_matching_content() {
        let data = b"some block";
        let cid = compute_cid(data).unwrap();
        assert!(verify_block(&cid, data).is_ok());
    }

    #[test]
    fn verify_rejects_tampered_content() {
        let cid = compute_cid(b"original").unwrap();
        let err = verify_block(&cid, b"tampered").unwrap_err();
        assert_eq!(*err.kind(), crate::RepoErrorKind::InvalidCid);
    }

    #[test]
    fn verify_rejects_unknown_codec() {
        let mh = multihash::Multihash::<64>::wrap(SHA2_256, &Sha256::digest(b"x")).unwrap();
        let cid = IpldCid::new_v1(0x70, mh);
        assert!(verify_block(&cid, b"x").is_err());
    }
}
