//! The configured block store backend

use std::future::Future;
use std::time::Duration;

use burrow_repo::error::{RepoError, Result};
use burrow_repo::storage::{MemoryBlockStore, ObjectBlockStore, RedbBlockStore};
use burrow_repo::{BlockStore, CommitData};
use bytes::Bytes;
use cid::Cid as IpldCid;

use crate::config::{BlockstoreKind, Config};

#[derive(Debug, Clone)]
enum Backend {
    Memory(MemoryBlockStore),
    Redb(RedbBlockStore),
    Object(ObjectBlockStore),
}

/// Block store picked by [`Config::blockstore`]
///
/// Every call is bounded by the configured storage timeout; an expired call fails with a
/// transient `Timeout` error and its future is dropped.
#[derive(Debug, Clone)]
pub struct AnyBlockStore {
    backend: Backend,
    timeout: Duration,
}

impl AnyBlockStore {
    /// Open the backend named in `config`, creating its files if needed
    pub fn open(config: &Config) -> Result<Self> {
        let backend = match config.blockstore {
            BlockstoreKind::Memory => Backend::Memory(MemoryBlockStore::new()),
            BlockstoreKind::Redb => {
                std::fs::create_dir_all(&config.data_dir).map_err(RepoError::io)?;
                Backend::Redb(RedbBlockStore::persistent(config.blocks_path())?)
            }
            BlockstoreKind::Object => Backend::Object(ObjectBlockStore::open(config.objects_dir())?),
        };
        tracing::info!(kind = ?config.blockstore, "opened block store");
        Ok(Self {
            backend,
            timeout: config.storage_timeout(),
        })
    }

    /// In-memory store with the given deadline
    pub fn memory(timeout: Duration) -> Self {
        Self {
            backend: Backend::Memory(MemoryBlockStore::new()),
            timeout,
        }
    }

    /// Which backend is in use
    pub fn kind(&self) -> BlockstoreKind {
        match self.backend {
            Backend::Memory(_) => BlockstoreKind::Memory,
            Backend::Redb(_) => BlockstoreKind::Redb,
            Backend::Object(_) => BlockstoreKind::Object,
        }
    }

    async fn bounded<T>(&self, op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(op, timeout = ?self.timeout, "block store call timed out");
                Err(RepoError::timeout(op))
            }
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $op:literal, |$store:ident| $call:expr) => {
        match &$self.backend {
            Backend::Memory($store) => $self.bounded($op, $call).await,
            Backend::Redb($store) => $self.bounded($op, $call).await,
            Backend::Object($store) => $self.bounded($op, $call).await,
        }
    };
}

impl BlockStore for AnyBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        dispatch!(self, "get", |store| store.get(cid))
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        dispatch!(self, "put", |store| store.put(data))
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        dispatch!(self, "has", |store| store.has(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let blocks: Vec<_> = blocks.into_iter().collect();
        dispatch!(self, "put_many", |store| store.put_many(blocks))
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        dispatch!(self, "get_many", |store| store.get_many(cids))
    }

    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        dispatch!(self, "apply_commit", |store| store.apply_commit(commit))
    }

    async fn delete_unreferenced(&self, cids: &[IpldCid]) -> Result<usize> {
        dispatch!(self, "delete_unreferenced", |store| store
            .delete_unreferenced(cids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn each_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        for kind in [
            BlockstoreKind::Memory,
            BlockstoreKind::Redb,
            BlockstoreKind::Object,
        ] {
            let config = Config {
                blockstore: kind,
                data_dir: dir.path().join(format!("{kind:?}")),
                ..Config::for_tests(dir.path())
            };
            let store = AnyBlockStore::open(&config).unwrap();
            assert_eq!(store.kind(), kind);

            let cid = store.put(b"block").await.unwrap();
            assert_eq!(store.put(b"block").await.unwrap(), cid);
            assert_eq!(store.get(&cid).await.unwrap().as_deref(), Some(&b"block"[..]));
            assert_eq!(store.delete_unreferenced(&[cid]).await.unwrap(), 1);
            assert!(!store.has(&cid).await.unwrap());
        }
    }
}
