//! Repository handle: head commit, tree and storage together
//!
//! Commits are built in two steps. [`Repository::format_commit`] is pure: it computes the
//! new tree, signs the commit and returns every new block in a [`CommitData`] without
//! touching storage. [`Repository::apply_commit`] then persists those blocks and moves
//! the handle to the new head. A commit that is formatted but never applied leaves no
//! trace.

use crate::car::{export_repo, export_repo_bytes, write_car_bytes};
use crate::commit::event::{CommitEvent, RepoOp};
use crate::commit::{Commit, SigningKey};
use crate::error::{RepoError, Result};
use crate::mst::{Mst, Mutation, util};
use crate::storage::{BlockStore, get_required};
use burrow_common::{Did, Tid};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// A record write requested by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite {
    /// Create or replace the record at `key`
    Put {
        /// Record path (`collection/rkey`)
        key: SmolStr,
        /// DAG-CBOR encoded record
        record: Bytes,
    },
    /// Remove the record at `key`
    Delete {
        /// Record path (`collection/rkey`)
        key: SmolStr,
    },
}

impl RecordWrite {
    /// Put shorthand
    pub fn put(key: impl Into<SmolStr>, record: impl Into<Bytes>) -> Self {
        RecordWrite::Put {
            key: key.into(),
            record: record.into(),
        }
    }

    /// Delete shorthand
    pub fn delete(key: impl Into<SmolStr>) -> Self {
        RecordWrite::Delete { key: key.into() }
    }

    /// Record path
    pub fn key(&self) -> &str {
        match self {
            RecordWrite::Put { key, .. } | RecordWrite::Delete { key } => key,
        }
    }
}

/// A signed, not yet persisted commit
#[derive(Debug, Clone)]
pub struct CommitData {
    /// Commit CID
    pub cid: IpldCid,

    /// The signed commit
    pub commit: Commit,

    /// New revision
    pub rev: Tid,

    /// Previous revision (None for genesis)
    pub since: Option<Tid>,

    /// Previous commit CID (None for genesis)
    pub prev: Option<IpldCid>,

    /// New MST root
    pub data: IpldCid,

    /// Previous MST root (None for genesis)
    pub prev_data: Option<IpldCid>,

    /// Every block introduced by this commit: MST nodes, records and the commit itself
    pub blocks: BTreeMap<IpldCid, Bytes>,

    /// Record operations performed
    pub ops: Vec<RepoOp>,

    /// Blocks no longer referenced from the new head (MST nodes and records)
    pub removed_cids: Vec<IpldCid>,
}

impl CommitData {
    /// CAR of this commit's blocks, rooted at the commit
    pub async fn to_car(&self) -> Result<Vec<u8>> {
        write_car_bytes(&[self.cid], self.blocks.clone()).await
    }

    /// Sync event for this commit
    pub async fn to_event(&self, seq: u64, time: DateTime<Utc>) -> Result<CommitEvent> {
        Ok(CommitEvent {
            seq,
            repo: self.commit.did().clone(),
            commit: self.cid,
            rev: self.rev.clone(),
            since: self.since.clone(),
            blocks: Bytes::from(self.to_car().await?),
            ops: self.ops.clone(),
            prev_data: self.prev_data,
            time,
        })
    }
}

/// A repository at a particular head commit
#[derive(Debug, Clone)]
pub struct Repository<S: BlockStore> {
    mst: Mst<S>,
    storage: Arc<S>,
    commit: Commit,
    commit_cid: IpldCid,
}

impl<S: BlockStore + Sync + 'static> Repository<S> {
    /// Load the repository whose head is `commit_cid`
    pub async fn from_commit(storage: Arc<S>, commit_cid: &IpldCid) -> Result<Self> {
        let commit_bytes = get_required(storage.as_ref(), commit_cid)
            .await
            .map_err(|e| e.with_help("apply the commit to storage before loading it"))?;
        let commit = Commit::from_cbor(&commit_bytes)?;
        let mst = Mst::load(storage.clone(), *commit.data(), None);

        Ok(Self {
            mst,
            storage,
            commit,
            commit_cid: *commit_cid,
        })
    }

    /// Genesis commit over an empty tree
    ///
    /// Pure; nothing is written to `storage`.
    pub async fn format_init_commit<K: SigningKey>(
        storage: Arc<S>,
        did: Did,
        rev: Tid,
        signing_key: &K,
    ) -> Result<CommitData> {
        let mst = Mst::new(storage);
        let (data, node) = mst.encode().await?;

        let commit = Commit::new_unsigned(did, data, rev.clone(), None).sign(signing_key)?;
        let (cid, commit_bytes) = commit.to_block()?;

        let blocks = BTreeMap::from([(data, node), (cid, commit_bytes)]);

        Ok(CommitData {
            cid,
            commit,
            rev,
            since: None,
            prev: None,
            data,
            prev_data: None,
            blocks,
            ops: Vec::new(),
            removed_cids: Vec::new(),
        })
    }

    /// Persist a genesis commit and open the repository at it
    pub async fn create_from_commit(storage: Arc<S>, commit_data: CommitData) -> Result<Self> {
        storage.apply_commit(&commit_data).await?;
        Self::from_commit(storage, &commit_data.cid).await
    }

    /// Build and sign the next commit from a batch of writes
    ///
    /// Pure with respect to storage. `rev` must be greater than the current revision.
    /// Writes are applied in order, so a later write to the same key wins.
    pub async fn format_commit<K: SigningKey>(
        &self,
        writes: &[RecordWrite],
        rev: Tid,
        signing_key: &K,
    ) -> Result<CommitData> {
        if rev <= self.commit.rev {
            return Err(RepoError::invalid_commit(format!(
                "revision {} does not advance past {}",
                rev, self.commit.rev
            )));
        }

        let mut record_blocks = BTreeMap::new();
        let mut mutations = Vec::with_capacity(writes.len());
        for write in writes {
            match write {
                RecordWrite::Put { key, record } => {
                    let cid = record_cid(key, record)?;
                    record_blocks.insert(cid, record.clone());
                    mutations.push(Mutation::put(key.clone(), cid));
                }
                RecordWrite::Delete { key } => mutations.push(Mutation::delete(key.clone())),
            }
        }

        let update = self.mst.apply(&mutations).await?;
        let mut blocks = update.blocks;
        for cid in &update.diff.new_leaf_cids {
            if let Some(record) = record_blocks.remove(cid) {
                blocks.insert(*cid, record);
            }
        }

        let commit = Commit::new_unsigned(
            self.commit.did.clone(),
            update.root,
            rev.clone(),
            Some(self.commit_cid),
        )
        .sign(signing_key)?;
        let (cid, commit_bytes) = commit.to_block()?;
        blocks.insert(cid, commit_bytes);

        let mut removed_cids = update.diff.removed_mst_blocks.clone();
        removed_cids.extend(update.diff.removed_cids.iter().copied());

        Ok(CommitData {
            cid,
            commit,
            rev,
            since: Some(self.commit.rev.clone()),
            prev: Some(self.commit_cid),
            data: update.root,
            prev_data: Some(*self.commit.data()),
            blocks,
            ops: update.diff.to_repo_ops(),
            removed_cids,
        })
    }

    /// Persist a formatted commit and advance to it
    ///
    /// The commit must have been formatted against the current head.
    pub async fn apply_commit(&mut self, commit_data: CommitData) -> Result<IpldCid> {
        if commit_data.prev != Some(self.commit_cid) {
            return Err(RepoError::invalid_commit(format!(
                "commit {} does not follow head {}",
                commit_data.cid, self.commit_cid
            )));
        }

        self.storage.apply_commit(&commit_data).await?;

        self.mst = Mst::load(self.storage.clone(), commit_data.data, None);
        self.commit = commit_data.commit;
        self.commit_cid = commit_data.cid;

        Ok(self.commit_cid)
    }

    /// Record CID at `key`
    pub async fn get_record_cid(&self, key: &str) -> Result<Option<IpldCid>> {
        self.mst.get(key).await
    }

    /// Record bytes at `key`
    pub async fn get_record(&self, key: &str) -> Result<Option<Bytes>> {
        match self.mst.get(key).await? {
            Some(cid) => get_required(self.storage.as_ref(), &cid).await.map(Some),
            None => Ok(None),
        }
    }

    /// Records in key order, starting strictly after `after`
    pub async fn list_records(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(SmolStr, IpldCid)>> {
        self.mst.leaves_after(after, limit).await
    }

    /// Every block this head keeps alive
    ///
    /// The whole commit chain back to genesis, plus the current tree and its records.
    pub async fn reachable_blocks(&self) -> Result<BTreeSet<IpldCid>> {
        let mut reachable = BTreeSet::new();
        self.mst.reachable_cids(&mut reachable).await?;

        let mut next = Some(self.commit_cid);
        while let Some(cid) = next {
            if !reachable.insert(cid) {
                break;
            }
            let commit = Commit::from_cbor(&get_required(self.storage.as_ref(), &cid).await?)?;
            next = commit.prev;
        }

        Ok(reachable)
    }

    /// Stream a full CAR export of the current head
    pub async fn export_car<W: AsyncWrite + Send + Unpin>(&self, writer: W) -> Result<()> {
        export_repo(writer, self.commit_cid, &self.mst).await
    }

    /// Full CAR export of the current head, in memory
    pub async fn to_car_bytes(&self) -> Result<Vec<u8>> {
        export_repo_bytes(self.commit_cid, &self.mst).await
    }

    /// Get the underlying MST
    pub fn mst(&self) -> &Mst<S> {
        &self.mst
    }

    /// Get reference to the storage
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Get the current commit
    pub fn current_commit(&self) -> &Commit {
        &self.commit
    }

    /// Get the current commit CID
    pub fn current_commit_cid(&self) -> &IpldCid {
        &self.commit_cid
    }

    /// Get the DID from the current commit
    pub fn did(&self) -> &Did {
        self.commit.did()
    }
}

/// CID of a record, rejecting bytes that are not DAG-CBOR
fn record_cid(key: &str, record: &[u8]) -> Result<IpldCid> {
    serde_ipld_dagcbor::from_slice::<Ipld>(record).map_err(|e| {
        RepoError::serialization(e).with_context(format!("record at {} is not DAG-CBOR", key))
    })?;
    util::compute_cid(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlockStore;
    use burrow_common::Ticker;

    fn record(text: &str) -> Bytes {
        let value = Ipld::Map(BTreeMap::from([(
            "text".to_string(),
            Ipld::String(text.to_string()),
        )]));
        Bytes::from(serde_ipld_dagcbor::to_vec(&value).unwrap())
    }

    async fn genesis(
        storage: Arc<MemoryBlockStore>,
        key: &k256::ecdsa::SigningKey,
        ticker: &mut Ticker,
    ) -> Repository<MemoryBlockStore> {
        let did = Did::new("did:plc:testrepo").unwrap();
        let init = Repository::format_init_commit(storage.clone(), did, ticker.next(None), key)
            .await
            .unwrap();
        Repository::create_from_commit(storage, init).await.unwrap()
    }

    #[tokio::test]
    async fn genesis_commit_has_null_prev_and_empty_tree() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let repo = genesis(storage.clone(), &key, &mut Ticker::new()).await;

        assert_eq!(repo.current_commit().prev(), None);
        assert_eq!(
            repo.current_commit().data().to_string(),
            "bafyreie5737gdxlw5i64vzichcalba3z2v5n6icifvx5xytvske7mr3hpm"
        );
        repo.current_commit().verify(&key.public_key()).unwrap();
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn format_commit_is_pure() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut ticker = Ticker::new();
        let repo = genesis(storage.clone(), &key, &mut ticker).await;
        let before = storage.len();

        let rev = ticker.next(Some(repo.current_commit().rev()));
        let data = repo
            .format_commit(&[RecordWrite::put("app.bsky.feed.post/abc", record("hi"))], rev, &key)
            .await
            .unwrap();

        assert_eq!(storage.len(), before);
        assert!(repo.get_record_cid("app.bsky.feed.post/abc").await.unwrap().is_none());
        assert_eq!(data.ops.len(), 1);
    }

    #[tokio::test]
    async fn commits_chain_and_records_resolve() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut ticker = Ticker::new();
        let mut repo = genesis(storage.clone(), &key, &mut ticker).await;
        let genesis_cid = *repo.current_commit_cid();

        let rev = ticker.next(Some(repo.current_commit().rev()));
        let first = repo
            .format_commit(&[RecordWrite::put("app.bsky.feed.post/abc", record("one"))], rev, &key)
            .await
            .unwrap();
        assert_eq!(first.prev, Some(genesis_cid));
        let first_cid = repo.apply_commit(first).await.unwrap();

        let rev = ticker.next(Some(repo.current_commit().rev()));
        let second = repo
            .format_commit(
                &[
                    RecordWrite::put("app.bsky.feed.post/abc", record("two")),
                    RecordWrite::delete("app.bsky.feed.post/missing"),
                ],
                rev,
                &key,
            )
            .await
            .unwrap();
        assert_eq!(second.prev, Some(first_cid));
        assert_eq!(second.ops.len(), 1);
        assert!(second.since.as_ref() < Some(&second.rev));
        repo.apply_commit(second).await.unwrap();

        assert_eq!(
            repo.get_record("app.bsky.feed.post/abc").await.unwrap(),
            Some(record("two"))
        );

        let reachable = repo.reachable_blocks().await.unwrap();
        assert!(reachable.contains(&genesis_cid));
        assert!(reachable.contains(&first_cid));
    }

    #[tokio::test]
    async fn stale_revision_rejected() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut ticker = Ticker::new();
        let repo = genesis(storage, &key, &mut ticker).await;

        let same = repo.current_commit().rev().clone();
        assert!(repo.format_commit(&[], same, &key).await.is_err());
    }

    #[tokio::test]
    async fn apply_rejects_commit_for_old_head() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut ticker = Ticker::new();
        let mut repo = genesis(storage, &key, &mut ticker).await;

        let rev = ticker.next(Some(repo.current_commit().rev()));
        let a = repo
            .format_commit(&[RecordWrite::put("app.bsky.feed.post/a", record("a"))], rev, &key)
            .await
            .unwrap();
        let rev = ticker.next(Some(&a.rev));
        let b = repo
            .format_commit(&[RecordWrite::put("app.bsky.feed.post/b", record("b"))], rev, &key)
            .await
            .unwrap();

        repo.apply_commit(a).await.unwrap();
        assert!(repo.apply_commit(b).await.is_err());
    }

    #[tokio::test]
    async fn rejects_non_cbor_records() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut ticker = Ticker::new();
        let repo = genesis(storage, &key, &mut ticker).await;

        let rev = ticker.next(Some(repo.current_commit().rev()));
        let bad = RecordWrite::put("app.bsky.feed.post/x", Bytes::from_static(&[0xff, 0x00]));
        assert!(repo.format_commit(&[bad], rev, &key).await.is_err());
    }

    #[tokio::test]
    async fn export_contains_every_block() {
        let storage = Arc::new(MemoryBlockStore::new());
        let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let mut ticker = Ticker::new();
        let mut repo = genesis(storage, &key, &mut ticker).await;

        let writes: Vec<_> = (0..20)
            .map(|i| RecordWrite::put(format!("app.bsky.feed.post/{i:03}"), record(&i.to_string())))
            .collect();
        let rev = ticker.next(Some(repo.current_commit().rev()));
        let data = repo.format_commit(&writes, rev, &key).await.unwrap();
        repo.apply_commit(data).await.unwrap();

        let car = repo.to_car_bytes().await.unwrap();
        let parsed = crate::car::parse_car_bytes(&car).await.unwrap();
        assert_eq!(parsed.root(), *repo.current_commit_cid());

        // reload from the export alone
        let imported = Arc::new(MemoryBlockStore::new_from_blocks(parsed.blocks));
        let reloaded = Repository::from_commit(imported, repo.current_commit_cid())
            .await
            .unwrap();
        assert_eq!(reloaded.list_records(None, 100).await.unwrap().len(), 20);
    }
}
