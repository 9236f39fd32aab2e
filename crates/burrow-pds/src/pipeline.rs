//! The write path: lock, allocate a revision, build and sign the commit, persist,
//! advance the head, publish

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use burrow_common::{Did, Tid};
use burrow_repo::commit::event::CommitEvent;
use burrow_repo::storage::{LayeredBlockStore, MemoryBlockStore};
use burrow_repo::{BlockStore, Commit, CommitData, Mst, RecordWrite, RepoError, RepoErrorKind, Repository};
use bytes::Bytes;
use cid::Cid as IpldCid;
use k256::ecdsa::SigningKey;
use tokio::sync::{OwnedMutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, info, instrument, warn};

use crate::blockstore::AnyBlockStore;
use crate::error::{PdsError, Result};
use crate::keys::KeyStore;
use crate::meta::{MetaStore, RepoRecord};
use crate::rev::RevisionAllocator;
use crate::sequencer::Sequencer;
use crate::status::RepoStatus;

type StagedStore = LayeredBlockStore<MemoryBlockStore, AnyBlockStore>;

/// Outcome of a successful commit
#[derive(Debug, Clone)]
pub struct Committed {
    /// The commit and every block it introduced
    pub commit: CommitData,
    /// Repository record after the head moved
    pub record: RepoRecord,
    /// Event published for it
    pub event: Arc<CommitEvent>,
}

/// Serializes writes per repository and turns them into signed commits
///
/// Writers to different repositories never wait on each other. Within one repository
/// the lock is held from revision allocation until the head has moved, so revisions
/// are applied in the order they were issued.
#[derive(Debug)]
pub struct CommitPipeline {
    storage: Arc<AnyBlockStore>,
    meta: MetaStore,
    keys: KeyStore,
    revs: RevisionAllocator,
    sequencer: Arc<Sequencer>,
    locks: std::sync::Mutex<HashMap<Did, Arc<tokio::sync::Mutex<()>>>>,
    gc_gate: RwLock<()>,
}

impl CommitPipeline {
    /// Pipeline over the given stores
    pub fn new(
        storage: Arc<AnyBlockStore>,
        meta: MetaStore,
        keys: KeyStore,
        sequencer: Arc<Sequencer>,
    ) -> Self {
        Self {
            storage,
            meta,
            keys,
            revs: RevisionAllocator::new(),
            sequencer,
            locks: Default::default(),
            gc_gate: RwLock::new(()),
        }
    }

    /// Block store commits are written to
    pub fn storage(&self) -> &Arc<AnyBlockStore> {
        &self.storage
    }

    /// Metadata store holding the heads
    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Sequencer events are published on
    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    /// Take the write lock for `did`
    async fn lock(&self, did: &Did) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap();
            // drop locks nobody is holding or waiting on
            if locks.len() > 1024 {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(did.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Exclude all writes, for the duration of a collection sweep
    pub(crate) async fn pause_writes(&self) -> RwLockWriteGuard<'_, ()> {
        self.gc_gate.write().await
    }

    /// Next revision for `did`, strictly after `current`
    pub fn next_revision(&self, did: &Did, current: Option<&Tid>) -> Tid {
        self.revs.next_revision(did, current)
    }

    /// Create a repository: store its signing key and write the genesis commit
    #[instrument(skip(self, key), fields(%did))]
    pub async fn create_repo(&self, did: &Did, key: &SigningKey) -> Result<Committed> {
        let _guard = self.lock(did).await;
        let _gc = self.gc_gate.read().await;
        if self.meta.get_repo(did).await?.is_some() {
            return Err(PdsError::input(
                "RepoAlreadyExists",
                format!("repository {did} already exists"),
            ));
        }

        let did_key = self.keys.store(did, key).await?;
        let rev = self.next_revision(did, None);
        let genesis =
            Repository::format_init_commit(self.storage.clone(), did.clone(), rev.clone(), key)
                .await
                .map_err(|e| signing_or(did, e))?;

        self.storage.apply_commit(&genesis).await?;
        let record = self
            .meta
            .create_repo(did.clone(), genesis.cid, rev, did_key)
            .await?;
        info!(head = %genesis.cid, rev = %record.rev, "created repository");

        let event = self.sequencer.publish(&genesis).await?;
        Ok(Committed {
            commit: genesis,
            record,
            event,
        })
    }

    /// Apply a batch of record writes as one commit
    ///
    /// With `swap_commit` set, the write only goes through if the head is still that
    /// commit. Nothing becomes visible unless the whole batch commits.
    #[instrument(skip(self, writes), fields(%did, writes = writes.len()))]
    pub async fn apply_writes(
        &self,
        did: &Did,
        writes: &[RecordWrite],
        swap_commit: Option<IpldCid>,
    ) -> Result<Committed> {
        // fail fast without queueing on the lock
        self.meta.get_active_repo(did).await?;

        let _guard = self.lock(did).await;
        let _gc = self.gc_gate.read().await;
        let record = self.meta.get_active_repo(did).await?;
        if let Some(swap) = swap_commit {
            if swap != record.head {
                return Err(PdsError::StaleRevision {
                    expected: swap.to_string(),
                    actual: record.head.to_string(),
                });
            }
        }

        let key = self.keys.load(did).await?;
        let repo = Repository::from_commit(self.storage.clone(), &record.head).await?;
        let rev = self.next_revision(did, Some(&record.rev));
        debug!(%rev, "formatting commit");

        let commit = repo
            .format_commit(writes, rev, &key)
            .await
            .map_err(|e| signing_or(did, e))?;
        self.finalize(&record, commit, &key).await
    }

    /// Sign and commit an already built tree
    ///
    /// `blocks` must hold every node and record under `new_root` that the store does
    /// not have yet. Fails with `StaleRevision` if `prev_commit` is not the head and
    /// with `Signing` if the repository key is unavailable.
    #[instrument(skip(self, blocks), fields(%did, %rev))]
    pub async fn commit(
        &self,
        did: &Did,
        new_root: IpldCid,
        rev: Tid,
        prev_commit: IpldCid,
        blocks: BTreeMap<IpldCid, Bytes>,
    ) -> Result<Committed> {
        let _guard = self.lock(did).await;
        let _gc = self.gc_gate.read().await;
        let record = self.meta.get_active_repo(did).await?;
        if prev_commit != record.head {
            return Err(PdsError::StaleRevision {
                expected: prev_commit.to_string(),
                actual: record.head.to_string(),
            });
        }
        if rev <= record.rev {
            return Err(PdsError::StaleRevision {
                expected: format!("revision after {}", record.rev),
                actual: rev.to_string(),
            });
        }
        let key = self.keys.load(did).await?;

        let staged = self.stage(blocks.clone());
        let head = Repository::from_commit(staged.clone(), &record.head).await?;
        let new_tree = Mst::load(staged.clone(), new_root, None);
        let diff = Mst::load(staged, *head.current_commit().data(), None)
            .diff(&new_tree)
            .await?;

        let commit = Commit::new_unsigned(did.clone(), new_root, rev.clone(), Some(record.head))
            .sign(&key)
            .map_err(|e| signing_or(did, e))?;
        let (cid, commit_bytes) = commit.to_block()?;

        let mut all_blocks = blocks;
        all_blocks.insert(cid, commit_bytes);
        let mut removed_cids = diff.removed_mst_blocks.clone();
        removed_cids.extend(diff.removed_cids.iter().copied());

        let commit = CommitData {
            cid,
            commit,
            rev,
            since: Some(record.rev.clone()),
            prev: Some(record.head),
            data: new_root,
            prev_data: Some(*head.current_commit().data()),
            blocks: all_blocks,
            ops: diff.to_repo_ops(),
            removed_cids,
        };
        self.finalize(&record, commit, &key).await
    }

    /// Move a repository to a new status
    ///
    /// Takes the write lock, so a status change never lands between a write's checks
    /// and its head update. Deleting a repository queues its blocks for collection.
    #[instrument(skip(self), fields(%did, %to))]
    pub async fn set_status(&self, did: &Did, to: RepoStatus) -> Result<RepoRecord> {
        let _guard = self.lock(did).await;
        let (from, record) = self.meta.set_status(did, to).await?;
        info!(%from, "repository status changed");

        if to == RepoStatus::Deleted {
            let repo = Repository::from_commit(self.storage.clone(), &record.head).await?;
            let blocks = repo.reachable_blocks().await?;
            debug!(blocks = blocks.len(), "queued deleted repository for collection");
            self.meta.add_gc_candidates(blocks).await?;
        }
        Ok(record)
    }

    fn stage(&self, blocks: BTreeMap<IpldCid, Bytes>) -> Arc<StagedStore> {
        Arc::new(LayeredBlockStore::new(
            MemoryBlockStore::new_from_blocks(blocks),
            self.storage.clone(),
        ))
    }

    /// Verify a signed commit in staging, flush it, move the head and publish
    async fn finalize(
        &self,
        record: &RepoRecord,
        commit: CommitData,
        key: &SigningKey,
    ) -> Result<Committed> {
        let did = &record.did;
        let staged = self.stage(commit.blocks.clone());
        let check = Repository::from_commit(staged, &commit.cid).await?;
        if check.mst().root().await? != commit.data {
            return Err(PdsError::Storage(RepoError::invalid_mst(format!(
                "staged tree does not hash to {}",
                commit.data
            ))));
        }
        check
            .current_commit()
            .verify(&burrow_repo::SigningKey::public_key(key))
            .map_err(|e| PdsError::Signing {
                did: did.to_string(),
                reason: e.to_string(),
            })?;

        self.storage.apply_commit(&commit).await?;
        let record = match self
            .meta
            .advance_head(did, record.head, commit.cid, commit.rev.clone())
            .await
        {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, commit = %commit.cid, "head did not advance, abandoning commit");
                self.meta
                    .add_gc_candidates(commit.blocks.keys().copied())
                    .await?;
                return Err(err);
            }
        };

        self.meta
            .add_gc_candidates(commit.removed_cids.iter().copied())
            .await?;
        info!(head = %commit.cid, rev = %commit.rev, ops = commit.ops.len(), "committed");

        let event = self.sequencer.publish(&commit).await?;
        Ok(Committed {
            commit,
            record,
            event,
        })
    }
}

/// Crypto failures from the repository layer surface as signing errors
fn signing_or(did: &Did, err: RepoError) -> PdsError {
    if *err.kind() == RepoErrorKind::Crypto {
        PdsError::Signing {
            did: did.to_string(),
            reason: err.to_string(),
        }
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;
    use std::time::Duration;

    fn pipeline(dir: &std::path::Path) -> CommitPipeline {
        CommitPipeline::new(
            Arc::new(AnyBlockStore::memory(Duration::from_secs(5))),
            MetaStore::in_memory().unwrap(),
            KeyStore::new(dir),
            Arc::new(Sequencer::new(64)),
        )
    }

    fn record(text: &str) -> Bytes {
        Bytes::from(serde_ipld_dagcbor::to_vec(&BTreeMap::from([("text", text)])).unwrap())
    }

    #[tokio::test]
    async fn genesis_then_write() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let did = Did::raw("did:plc:writer");

        let genesis = pipeline.create_repo(&did, &generate_key()).await.unwrap();
        assert!(genesis.commit.prev.is_none());
        assert_eq!(genesis.record.head, genesis.commit.cid);

        let written = pipeline
            .apply_writes(
                &did,
                &[RecordWrite::put("app.bsky.feed.post/abc", record("hi"))],
                Some(genesis.commit.cid),
            )
            .await
            .unwrap();
        assert_eq!(written.commit.prev, Some(genesis.commit.cid));
        assert!(written.commit.rev > genesis.commit.rev);
        assert_eq!(written.record.head, written.commit.cid);
        assert_eq!(written.event.seq, genesis.event.seq + 1);

        let repo = Repository::from_commit(pipeline.storage().clone(), &written.record.head)
            .await
            .unwrap();
        assert_eq!(
            repo.get_record("app.bsky.feed.post/abc").await.unwrap(),
            Some(record("hi"))
        );
    }

    #[tokio::test]
    async fn stale_swap_leaves_head_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let did = Did::raw("did:plc:swapper");
        let genesis = pipeline.create_repo(&did, &generate_key()).await.unwrap();

        pipeline
            .apply_writes(&did, &[RecordWrite::put("a.b/1", record("one"))], None)
            .await
            .unwrap();
        let err = pipeline
            .apply_writes(
                &did,
                &[RecordWrite::put("a.b/2", record("two"))],
                Some(genesis.commit.cid),
            )
            .await
            .unwrap_err();
        assert!(err.needs_refresh());
        assert_eq!(err.error_name(), "InvalidSwap");
    }

    #[tokio::test]
    async fn missing_key_fails_without_moving_head() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let did = Did::raw("did:plc:keyless");
        let genesis = pipeline.create_repo(&did, &generate_key()).await.unwrap();

        std::fs::remove_file(pipeline.keys.key_path(&did)).unwrap();
        let err = pipeline
            .apply_writes(&did, &[RecordWrite::put("a.b/1", record("x"))], None)
            .await
            .unwrap_err();
        assert!(matches!(err, PdsError::Signing { .. }));

        let head = pipeline.meta().get_repo(&did).await.unwrap().unwrap();
        assert_eq!(head.head, genesis.commit.cid);
        assert_eq!(head.rev, genesis.record.rev);
    }

    #[tokio::test]
    async fn writes_against_inactive_repos_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let did = Did::raw("did:plc:paused");
        pipeline.create_repo(&did, &generate_key()).await.unwrap();

        pipeline
            .set_status(&did, RepoStatus::Deactivated)
            .await
            .unwrap();
        let err = pipeline
            .apply_writes(&did, &[RecordWrite::put("a.b/1", record("x"))], None)
            .await
            .unwrap_err();
        assert_eq!(err.error_name(), "RepoDeactivated");
    }

    #[tokio::test]
    async fn commit_prebuilt_tree() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let did = Did::raw("did:plc:builder");
        let genesis = pipeline.create_repo(&did, &generate_key()).await.unwrap();

        // build a one-record tree off to the side
        let scratch = Arc::new(MemoryBlockStore::new());
        let rec = record("prebuilt");
        let rec_cid = scratch.put(&rec).await.unwrap();
        let tree = Mst::new(scratch.clone())
            .add("app.bsky.feed.post/x", rec_cid)
            .await
            .unwrap();
        let (root, mut blocks) = tree.collect_blocks().await.unwrap();
        blocks.insert(rec_cid, rec);

        let rev = pipeline.next_revision(&did, Some(&genesis.record.rev));
        let stale = pipeline
            .commit(&did, root, rev.clone(), rec_cid, blocks.clone())
            .await
            .unwrap_err();
        assert!(stale.needs_refresh());

        let committed = pipeline
            .commit(&did, root, rev, genesis.commit.cid, blocks)
            .await
            .unwrap();
        assert_eq!(committed.record.head, committed.commit.cid);
        assert_eq!(committed.commit.ops.len(), 1);
        assert_eq!(committed.commit.ops[0].path, "app.bsky.feed.post/x");
    }
}
