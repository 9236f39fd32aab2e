//! Repository and blob metadata in an embedded `redb` database
//!
//! Holds the per-repository head record, the creation-ordered indexes that back the
//! listing cursors, blob ownership, and the queue of garbage-collection candidates.
//! Every creation timestamp comes from one store-wide clock that only moves forward, so
//! a new row can never sort behind a cursor that was already handed out.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use burrow_common::{Did, Tid};
use burrow_repo::RepoError;
use cid::Cid as IpldCid;
use redb::{
    Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction,
    backends::InMemoryBackend,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cursor::Cursor;
use crate::error::{PdsError, Result};
use crate::status::RepoStatus;

const REPOS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("repos-1");
const REPOS_BY_CREATED_TABLE: TableDefinition<(u64, &str), ()> =
    TableDefinition::new("repos-by-created-1");
const BLOBS_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("blobs-1");
const BLOBS_BY_CREATED_TABLE: TableDefinition<(&str, u64, &str), ()> =
    TableDefinition::new("blobs-by-created-1");
const BLOB_OWNERS_TABLE: TableDefinition<(&str, &str), ()> = TableDefinition::new("blob-owners-1");
const GC_CANDIDATES_TABLE: TableDefinition<&[u8], ()> = TableDefinition::new("gc-candidates-1");
const CLOCK_TABLE: TableDefinition<&str, u64> = TableDefinition::new("clock-1");

const CREATED_CLOCK: &str = "created";

/// Durable state of one hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRecord {
    /// Repository DID
    pub did: Did,
    /// Current head commit
    pub head: IpldCid,
    /// Revision of the head commit
    pub rev: Tid,
    /// Hosting status
    pub status: RepoStatus,
    /// Creation time, microseconds since the epoch
    pub created_at: u64,
    /// `did:key` of the signing key
    pub signing_key: String,
}

/// Metadata of one blob as held by one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    /// Raw-codec CID of the bytes
    pub cid: IpldCid,
    /// Owning repository
    pub owner: Did,
    /// Declared media type
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
    /// When this owner first stored it, microseconds since the epoch
    pub created_at: u64,
}

impl BlobRecord {
    /// Listing position of this blob
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.cid.to_string())
    }
}

impl RepoRecord {
    /// Listing position of this repository
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.did.as_str())
    }
}

/// Metadata store
#[derive(Debug, Clone)]
pub struct MetaStore {
    db: Arc<Database>,
}

impl MetaStore {
    /// Open or create the database at `path`
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading metadata database from {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::builder().create(path)?;
        Self::open(db)
    }

    /// Database held entirely in memory
    pub fn in_memory() -> Result<Self> {
        debug!("using in-memory metadata database");
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::open(db)
    }

    fn open(db: Database) -> Result<Self> {
        let tx = db.begin_write()?;
        {
            tx.open_table(REPOS_TABLE)?;
            tx.open_table(REPOS_BY_CREATED_TABLE)?;
            tx.open_table(BLOBS_TABLE)?;
            tx.open_table(BLOBS_BY_CREATED_TABLE)?;
            tx.open_table(BLOB_OWNERS_TABLE)?;
            tx.open_table(GC_CANDIDATES_TABLE)?;
            tx.open_table(CLOCK_TABLE)?;
        }
        tx.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    /// Register a new repository at its genesis commit
    pub async fn create_repo(
        &self,
        did: Did,
        head: IpldCid,
        rev: Tid,
        signing_key: String,
    ) -> Result<RepoRecord> {
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            let record = {
                let mut repos = tx.open_table(REPOS_TABLE)?;
                if repos.get(did.as_str())?.is_some() {
                    return Err(PdsError::input(
                        "RepoAlreadyExists",
                        format!("repository {did} already exists"),
                    ));
                }
                let record = RepoRecord {
                    created_at: next_created(&tx)?,
                    did,
                    head,
                    rev,
                    status: RepoStatus::Active,
                    signing_key,
                };
                repos.insert(record.did.as_str(), encode(&record)?.as_slice())?;
                let mut by_created = tx.open_table(REPOS_BY_CREATED_TABLE)?;
                by_created.insert((record.created_at, record.did.as_str()), ())?;
                record
            };
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    /// Current record for `did`, deleted or not
    pub async fn get_repo(&self, did: &Did) -> Result<Option<RepoRecord>> {
        let did = did.clone();
        self.blocking(move |db| {
            let tx = db.begin_read()?;
            let repos = tx.open_table(REPOS_TABLE)?;
            repos
                .get(did.as_str())?
                .map(|row| decode(row.value()))
                .transpose()
        })
        .await
    }

    /// Record for `did`, failing if it is missing or not active
    pub async fn get_active_repo(&self, did: &Did) -> Result<RepoRecord> {
        let record = self
            .get_repo(did)
            .await?
            .ok_or_else(|| PdsError::repo_not_found(did))?;
        match record.status.read_error(did) {
            Some(err) => Err(err),
            None => Ok(record),
        }
    }

    /// Compare-and-swap the head of an active repository
    ///
    /// Fails with `StaleRevision` unless the stored head is `expected`, and leaves the
    /// record untouched on any failure.
    pub async fn advance_head(
        &self,
        did: &Did,
        expected: IpldCid,
        head: IpldCid,
        rev: Tid,
    ) -> Result<RepoRecord> {
        let did = did.clone();
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            let record = {
                let mut repos = tx.open_table(REPOS_TABLE)?;
                let mut record: RepoRecord = match repos.get(did.as_str())? {
                    Some(row) => decode(row.value())?,
                    None => return Err(PdsError::repo_not_found(&did)),
                };
                if let Some(err) = record.status.read_error(&did) {
                    return Err(err);
                }
                if record.head != expected {
                    return Err(PdsError::StaleRevision {
                        expected: expected.to_string(),
                        actual: record.head.to_string(),
                    });
                }
                if rev <= record.rev {
                    return Err(PdsError::StaleRevision {
                        expected: format!("revision after {}", record.rev),
                        actual: rev.to_string(),
                    });
                }
                record.head = head;
                record.rev = rev;
                repos.insert(did.as_str(), encode(&record)?.as_slice())?;
                record
            };
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    /// Move a repository to a new status, returning the previous one
    ///
    /// Deleted repositories leave the listing index.
    pub async fn set_status(&self, did: &Did, to: RepoStatus) -> Result<(RepoStatus, RepoRecord)> {
        let did = did.clone();
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            let (from, record) = {
                let mut repos = tx.open_table(REPOS_TABLE)?;
                let mut record: RepoRecord = match repos.get(did.as_str())? {
                    Some(row) => decode(row.value())?,
                    None => return Err(PdsError::repo_not_found(&did)),
                };
                let from = record.status;
                record.status = from.transition(to)?;
                repos.insert(did.as_str(), encode(&record)?.as_slice())?;
                if to == RepoStatus::Deleted {
                    let mut by_created = tx.open_table(REPOS_BY_CREATED_TABLE)?;
                    by_created.remove((record.created_at, did.as_str()))?;
                }
                (from, record)
            };
            tx.commit()?;
            Ok((from, record))
        })
        .await
    }

    /// Non-deleted repositories, newest first, strictly older than `cursor`
    pub async fn list_repos(&self, cursor: Option<Cursor>, limit: usize) -> Result<Vec<RepoRecord>> {
        self.blocking(move |db| {
            let tx = db.begin_read()?;
            let by_created = tx.open_table(REPOS_BY_CREATED_TABLE)?;
            let repos = tx.open_table(REPOS_TABLE)?;
            let range = match &cursor {
                Some(c) => by_created.range((0u64, "")..(c.micros, c.id.as_str()))?,
                None => by_created.iter()?,
            };

            let mut out = Vec::with_capacity(limit.min(1024));
            for entry in range.rev().take(limit) {
                let (key, _) = entry?;
                let (_, did) = key.value();
                let row = repos.get(did)?.ok_or_else(|| {
                    PdsError::Storage(RepoError::not_found("repository record", did))
                })?;
                out.push(decode(row.value())?);
            }
            Ok(out)
        })
        .await
    }

    /// Every repository record, including deleted ones
    pub async fn all_repos(&self) -> Result<Vec<RepoRecord>> {
        self.blocking(|db| {
            let tx = db.begin_read()?;
            let repos = tx.open_table(REPOS_TABLE)?;
            let mut out = Vec::with_capacity(repos.len()? as usize);
            for entry in repos.iter()? {
                let (_, row) = entry?;
                out.push(decode(row.value())?);
            }
            Ok(out)
        })
        .await
    }

    /// Record that `owner` holds blob `cid`
    ///
    /// Idempotent per owner: storing again keeps the first record and its position in
    /// the listing. The flag is true when a new record was written.
    pub async fn put_blob(
        &self,
        owner: &Did,
        cid: IpldCid,
        mime_type: &str,
        size: u64,
    ) -> Result<(BlobRecord, bool)> {
        let owner = owner.clone();
        let mime_type = mime_type.to_string();
        self.blocking(move |db| {
            let cid_str = cid.to_string();
            let tx = db.begin_write()?;
            let result = {
                let mut blobs = tx.open_table(BLOBS_TABLE)?;
                let existing = blobs
                    .get((owner.as_str(), cid_str.as_str()))?
                    .map(|row| decode::<BlobRecord>(row.value()))
                    .transpose()?;
                match existing {
                    Some(record) => (record, false),
                    None => {
                        let record = BlobRecord {
                            cid,
                            owner: owner.clone(),
                            mime_type,
                            size,
                            created_at: next_created(&tx)?,
                        };
                        blobs.insert(
                            (owner.as_str(), cid_str.as_str()),
                            encode(&record)?.as_slice(),
                        )?;
                        tx.open_table(BLOBS_BY_CREATED_TABLE)?.insert(
                            (owner.as_str(), record.created_at, cid_str.as_str()),
                            (),
                        )?;
                        tx.open_table(BLOB_OWNERS_TABLE)?
                            .insert((cid_str.as_str(), owner.as_str()), ())?;
                        (record, true)
                    }
                }
            };
            tx.commit()?;
            Ok(result)
        })
        .await
    }

    /// Blob record for `owner`, if they hold it
    pub async fn get_blob(&self, owner: &Did, cid: &IpldCid) -> Result<Option<BlobRecord>> {
        let owner = owner.clone();
        let cid = cid.to_string();
        self.blocking(move |db| {
            let tx = db.begin_read()?;
            let blobs = tx.open_table(BLOBS_TABLE)?;
            blobs
                .get((owner.as_str(), cid.as_str()))?
                .map(|row| decode(row.value()))
                .transpose()
        })
        .await
    }

    /// Blobs of `owner`, newest first, strictly older than `cursor`
    pub async fn list_blobs(
        &self,
        owner: &Did,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Vec<BlobRecord>> {
        let owner = owner.clone();
        self.blocking(move |db| {
            let tx = db.begin_read()?;
            let by_created = tx.open_table(BLOBS_BY_CREATED_TABLE)?;
            let blobs = tx.open_table(BLOBS_TABLE)?;
            let did = owner.as_str();
            let range = match &cursor {
                Some(c) => by_created.range((did, 0u64, "")..(did, c.micros, c.id.as_str()))?,
                None => by_created.range((did, 0u64, "")..(did, u64::MAX, ""))?,
            };

            let mut out = Vec::with_capacity(limit.min(1024));
            for entry in range.rev().take(limit) {
                let (key, _) = entry?;
                let (_, _, cid) = key.value();
                let row = blobs.get((did, cid))?.ok_or_else(|| {
                    PdsError::Storage(RepoError::not_found("blob record", cid))
                })?;
                out.push(decode(row.value())?);
            }
            Ok(out)
        })
        .await
    }

    /// Blobs whose owners are all deleted repositories
    pub async fn orphaned_blobs(&self) -> Result<Vec<IpldCid>> {
        self.blocking(|db| {
            let tx = db.begin_read()?;
            let repos = tx.open_table(REPOS_TABLE)?;
            let owners = tx.open_table(BLOB_OWNERS_TABLE)?;

            let mut live: BTreeMap<String, bool> = BTreeMap::new();
            for entry in owners.iter()? {
                let (key, _) = entry?;
                let (cid, did) = key.value();
                let owner_live = match repos.get(did)? {
                    Some(row) => decode::<RepoRecord>(row.value())?.status != RepoStatus::Deleted,
                    None => false,
                };
                *live.entry(cid.to_string()).or_default() |= owner_live;
            }

            live.into_iter()
                .filter(|(_, any_live)| !any_live)
                .map(|(cid, _)| {
                    cid.parse::<IpldCid>()
                        .map_err(|e| PdsError::Storage(RepoError::invalid_cid(e.to_string())))
                })
                .collect()
        })
        .await
    }

    /// Drop every metadata row for blob `cid`, if all of its owners are deleted
    ///
    /// Ownership is re-read inside the write transaction, so an owner added after an
    /// earlier `orphaned_blobs` scan keeps the blob. Returns whether anything was dropped.
    pub async fn purge_orphaned_blob(&self, cid: &IpldCid) -> Result<bool> {
        let cid = cid.to_string();
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            let purged = {
                let repos = tx.open_table(REPOS_TABLE)?;
                let mut owners = tx.open_table(BLOB_OWNERS_TABLE)?;
                let mut blobs = tx.open_table(BLOBS_TABLE)?;
                let mut by_created = tx.open_table(BLOBS_BY_CREATED_TABLE)?;

                let mut dids = Vec::new();
                for entry in owners.range((cid.as_str(), "")..)? {
                    let (key, _) = entry?;
                    let (entry_cid, did) = key.value();
                    if entry_cid != cid {
                        break;
                    }
                    dids.push(did.to_string());
                }

                let mut any_live = false;
                for did in &dids {
                    if let Some(row) = repos.get(did.as_str())? {
                        let record: RepoRecord = decode(row.value())?;
                        any_live |= record.status != RepoStatus::Deleted;
                    }
                }

                if !any_live && !dids.is_empty() {
                    for did in &dids {
                        if let Some(row) = blobs.remove((did.as_str(), cid.as_str()))? {
                            let record: BlobRecord = decode(row.value())?;
                            by_created.remove((did.as_str(), record.created_at, cid.as_str()))?;
                        }
                        owners.remove((cid.as_str(), did.as_str()))?;
                    }
                }
                !any_live && !dids.is_empty()
            };
            if purged {
                tx.commit()?;
            } else {
                tx.abort()?;
            }
            Ok(purged)
        })
        .await
    }

    /// Queue blocks that may have become unreferenced
    pub async fn add_gc_candidates(&self, cids: impl IntoIterator<Item = IpldCid>) -> Result<()> {
        let keys: Vec<Vec<u8>> = cids.into_iter().map(|cid| cid.to_bytes()).collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            {
                let mut table = tx.open_table(GC_CANDIDATES_TABLE)?;
                for key in &keys {
                    table.insert(key.as_slice(), ())?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Queued collection candidates
    pub async fn gc_candidates(&self) -> Result<BTreeSet<IpldCid>> {
        self.blocking(|db| {
            let tx = db.begin_read()?;
            let table = tx.open_table(GC_CANDIDATES_TABLE)?;
            let mut out = BTreeSet::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                let cid = IpldCid::try_from(key.value())
                    .map_err(|e| PdsError::Storage(RepoError::invalid_cid(e.to_string())))?;
                out.insert(cid);
            }
            Ok(out)
        })
        .await
    }

    /// Remove candidates that have been dealt with
    pub async fn clear_gc_candidates(&self, cids: impl IntoIterator<Item = IpldCid>) -> Result<()> {
        let keys: Vec<Vec<u8>> = cids.into_iter().map(|cid| cid.to_bytes()).collect();
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            {
                let mut table = tx.open_table(GC_CANDIDATES_TABLE)?;
                for key in &keys {
                    table.remove(key.as_slice())?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

/// Next creation timestamp: wall clock, but strictly after the last one handed out
fn next_created(tx: &WriteTransaction) -> Result<u64> {
    let mut clock = tx.open_table(CLOCK_TABLE)?;
    let last = clock.get(CREATED_CLOCK)?.map(|v| v.value()).unwrap_or(0);
    let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
    let next = now.max(last + 1);
    clock.insert(CREATED_CLOCK, next)?;
    Ok(next)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(value).map_err(|e| PdsError::Storage(RepoError::serialization(e)))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|e| PdsError::Storage(RepoError::serialization(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_repo::mst::util::{cid_for_codec, compute_cid};

    fn did(n: usize) -> Did {
        Did::raw(&format!("did:plc:repo{n}"))
    }

    async fn create(store: &MetaStore, n: usize) -> RepoRecord {
        let head = compute_cid(format!("genesis {n}").as_bytes()).unwrap();
        store
            .create_repo(did(n), head, Tid::now(0), "did:key:zTest".into())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let store = MetaStore::in_memory().unwrap();
        create(&store, 1).await;
        let err = store
            .create_repo(did(1), compute_cid(b"x").unwrap(), Tid::now(0), String::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_name(), "RepoAlreadyExists");
    }

    #[tokio::test]
    async fn creation_clock_is_strictly_increasing() {
        let store = MetaStore::in_memory().unwrap();
        let mut last = 0;
        for n in 0..20 {
            let record = create(&store, n).await;
            assert!(record.created_at > last);
            last = record.created_at;
        }
    }

    #[tokio::test]
    async fn advance_head_is_compare_and_swap() {
        let store = MetaStore::in_memory().unwrap();
        let record = create(&store, 1).await;
        let next = compute_cid(b"commit 2").unwrap();
        let mut ticker = burrow_common::Ticker::with_clock_id(1);
        let rev = ticker.next(Some(&record.rev));

        let stale = store
            .advance_head(&record.did, next, next, rev.clone())
            .await
            .unwrap_err();
        assert!(stale.needs_refresh());
        assert_eq!(store.get_repo(&record.did).await.unwrap().unwrap(), record);

        let updated = store
            .advance_head(&record.did, record.head, next, rev.clone())
            .await
            .unwrap();
        assert_eq!(updated.head, next);
        assert_eq!(updated.rev, rev);

        let err = store
            .advance_head(&record.did, next, record.head, rev)
            .await
            .unwrap_err();
        assert!(err.needs_refresh(), "revision must advance");
    }

    #[tokio::test]
    async fn status_gates_writes_and_listing() {
        let store = MetaStore::in_memory().unwrap();
        let a = create(&store, 1).await;
        let b = create(&store, 2).await;

        store.set_status(&a.did, RepoStatus::Takendown).await.unwrap();
        let err = store
            .advance_head(&a.did, a.head, a.head, Tid::now(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_name(), "RepoTakendown");

        let err = store
            .set_status(&a.did, RepoStatus::Deactivated)
            .await
            .unwrap_err();
        assert_eq!(err.error_name(), "InvalidStatusTransition");

        store.set_status(&b.did, RepoStatus::Deleted).await.unwrap();
        let listed = store.list_repos(None, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].did, a.did);
        assert_eq!(listed[0].status, RepoStatus::Takendown);
        assert_eq!(store.all_repos().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repo_listing_pages_newest_first() {
        let store = MetaStore::in_memory().unwrap();
        for n in 0..7 {
            create(&store, n).await;
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.list_repos(cursor.clone(), 3).await.unwrap();
            seen.extend(page.iter().map(|r| r.did.clone()));
            if page.len() < 3 {
                break;
            }
            cursor = page.last().map(RepoRecord::cursor);
        }
        let expected: Vec<Did> = (0..7).rev().map(did).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn blobs_dedupe_per_owner_and_orphan_on_delete() {
        let store = MetaStore::in_memory().unwrap();
        let a = create(&store, 1).await;
        let b = create(&store, 2).await;
        let cid = cid_for_codec(burrow_repo::RAW_CID_CODEC, b"image").unwrap();

        let (first, created) = store.put_blob(&a.did, cid, "image/png", 5).await.unwrap();
        assert!(created);
        let (again, created) = store.put_blob(&a.did, cid, "image/png", 5).await.unwrap();
        assert!(!created);
        assert_eq!(first, again);
        store.put_blob(&b.did, cid, "image/png", 5).await.unwrap();

        store.set_status(&a.did, RepoStatus::Deleted).await.unwrap();
        assert!(store.orphaned_blobs().await.unwrap().is_empty());

        store.set_status(&b.did, RepoStatus::Deleted).await.unwrap();
        assert_eq!(store.orphaned_blobs().await.unwrap(), vec![cid]);

        assert!(store.purge_orphaned_blob(&cid).await.unwrap());
        assert!(store.get_blob(&b.did, &cid).await.unwrap().is_none());
        assert!(store.list_blobs(&b.did, None, 10).await.unwrap().is_empty());
        assert!(store.orphaned_blobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_keeps_blob_that_gained_a_live_owner() {
        let store = MetaStore::in_memory().unwrap();
        let gone = create(&store, 1).await;
        let live = create(&store, 2).await;
        let cid = cid_for_codec(burrow_repo::RAW_CID_CODEC, b"shared").unwrap();

        store.put_blob(&gone.did, cid, "image/png", 6).await.unwrap();
        store.set_status(&gone.did, RepoStatus::Deleted).await.unwrap();
        let orphans = store.orphaned_blobs().await.unwrap();
        assert_eq!(orphans, vec![cid]);

        // a live repository uploads the same bytes before the sweep reaches them
        store.put_blob(&live.did, cid, "image/png", 6).await.unwrap();

        assert!(!store.purge_orphaned_blob(&cid).await.unwrap());
        assert!(store.get_blob(&live.did, &cid).await.unwrap().is_some());
        assert!(store.get_blob(&gone.did, &cid).await.unwrap().is_some());
        assert!(store.orphaned_blobs().await.unwrap().is_empty());

        let unknown = cid_for_codec(burrow_repo::RAW_CID_CODEC, b"never").unwrap();
        assert!(!store.purge_orphaned_blob(&unknown).await.unwrap());
    }

    #[tokio::test]
    async fn gc_candidate_queue() {
        let store = MetaStore::in_memory().unwrap();
        let x = compute_cid(b"x").unwrap();
        let y = compute_cid(b"y").unwrap();
        store.add_gc_candidates([x, y, x]).await.unwrap();
        assert_eq!(store.gc_candidates().await.unwrap().len(), 2);
        store.clear_gc_candidates([x]).await.unwrap();
        assert_eq!(
            store.gc_candidates().await.unwrap().into_iter().collect::<Vec<_>>(),
            vec![y]
        );
    }
}
