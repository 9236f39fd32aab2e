//! Embedded block storage backed by a `redb` table

use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use crate::storage::{BlockStore, verify_blocks};
use bytes::Bytes;
use cid::Cid as IpldCid;
use redb::{Database, ReadableTable, TableDefinition, backends::InMemoryBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const BLOCKS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blocks-1");

/// Block store in a single embedded database table keyed by binary CID.
///
/// Each batch (`put_many`, `apply_commit`, `delete_unreferenced`) is one write
/// transaction, so a commit's blocks land together or not at all. All database work
/// runs on the blocking thread pool; dropping a pending future never leaves a half
/// written transaction behind.
#[derive(Debug, Clone)]
pub struct RedbBlockStore {
    db: Arc<Database>,
}

impl RedbBlockStore {
    /// Open or create a database file at `path`
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading block database from {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepoError::io(e).with_context(format!(
                    "creating block database directory {}",
                    parent.display()
                ))
            })?;
        }
        let db = Database::builder().create(path)?;
        Self::open(db)
    }

    /// Database held entirely in memory
    pub fn in_memory() -> Result<Self> {
        debug!("using in-memory block database");
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::open(db)
    }

    /// Wrap an already opened database, creating the blocks table if missing
    pub fn open(db: Database) -> Result<Self> {
        let write_tx = db.begin_write()?;
        {
            let _table = write_tx.open_table(BLOCKS_TABLE)?;
        }
        write_tx.commit()?;
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
}

fn write_blocks(db: &Database, blocks: Vec<(IpldCid, Bytes)>) -> Result<()> {
    let tx = db.begin_write()?;
    {
        let mut table = tx.open_table(BLOCKS_TABLE)?;
        for (cid, data) in &blocks {
            table.insert(cid.to_bytes().as_slice(), data.as_ref())?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn read_block(db: &Database, cid: &IpldCid) -> Result<Option<Bytes>> {
    let tx = db.begin_read()?;
    let table = tx.open_table(BLOCKS_TABLE)?;
    let Some(row) = table.get(cid.to_bytes().as_slice())? else {
        return Ok(None);
    };
    Ok(Some(Bytes::copy_from_slice(row.value())))
}

impl BlockStore for RedbBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        let cid = *cid;
        self.blocking(move |db| read_block(db, &cid)).await
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = crate::mst::util::compute_cid(data)?;
        let data = Bytes::copy_from_slice(data);
        self.blocking(move |db| write_blocks(db, vec![(cid, data)]))
            .await?;
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        let key = cid.to_bytes();
        self.blocking(move |db| {
            let tx = db.begin_read()?;
            let table = tx.open_table(BLOCKS_TABLE)?;
            let found = table.get(key.as_slice())?.is_some();
            Ok(found)
        })
        .await
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let blocks = verify_blocks(blocks.into_iter().collect())?;
        if blocks.is_empty() {
            return Ok(());
        }
        self.blocking(move |db| write_blocks(db, blocks)).await
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let keys: Vec<Vec<u8>> = cids.iter().map(|cid| cid.to_bytes()).collect();
        self.blocking(move |db| {
            let tx = db.begin_read()?;
            let table = tx.open_table(BLOCKS_TABLE)?;
            let mut results = Vec::with_capacity(keys.len());
            for key in &keys {
                let row = table.get(key.as_slice())?;
                results.push(row.map(|row| Bytes::copy_from_slice(row.value())));
            }
            Ok(results)
        })
        .await
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        let blocks = verify_blocks(
            commit
                .blocks
                .iter()
                .map(|(cid, data)| (*cid, data.clone()))
                .collect(),
        )?;
        self.blocking(move |db| write_blocks(db, blocks)).await
    }

    async fn delete_unreferenced(&self, cids: &[IpldCid]) -> Result<usize> {
        let keys: Vec<Vec<u8>> = cids.iter().map(|cid| cid.to_bytes()).collect();
        self.blocking(move |db| {
            let tx = db.begin_write()?;
            let removed = {
                let mut table = tx.open_table(BLOCKS_TABLE)?;
                let mut removed = 0;
                for key in &keys {
                    if table.remove(key.as_slice())?.is_some() {
                        removed += 1;
                    }
                }
                removed
            };
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}
