//! Directory-backed object storage for blocks
//!
//! Every block is one object file named by its CID, sharded into subdirectories by the
//! CID's last two characters. Objects are written to a temp file and renamed into place,
//! so readers only ever see complete blocks.

use crate::error::{RepoError, Result};
use crate::repo::CommitData;
use crate::storage::{BlockStore, verify_blocks};
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Object-per-block store rooted at a directory
#[derive(Debug, Clone)]
pub struct ObjectBlockStore {
    root: Arc<PathBuf>,
}

impl ObjectBlockStore {
    /// Open (creating if needed) an object store at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("using object block store at {}", root.display());
        for dir in [root.join("blocks"), root.join("tmp")] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                RepoError::io(e).with_context(format!("creating {}", dir.display()))
            })?;
        }
        Ok(Self {
            root: Arc::new(root),
        })
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || f(&root)).await?
    }
}

fn object_path(root: &Path, cid: &IpldCid) -> PathBuf {
    let name = cid.to_string();
    let shard = &name[name.len().saturating_sub(2)..];
    root.join("blocks").join(shard).join(name)
}

fn read_object(root: &Path, cid: &IpldCid) -> Result<Option<Bytes>> {
    match std::fs::read(object_path(root, cid)) {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RepoError::io(e).with_context(format!("reading block {}", cid))),
    }
}

fn write_object(root: &Path, cid: &IpldCid, data: &[u8]) -> Result<()> {
    let path = object_path(root, cid);
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(RepoError::io)?;
    }
    let mut tmp = tempfile::NamedTempFile::new_in(root.join("tmp")).map_err(RepoError::io)?;
    tmp.write_all(data).map_err(RepoError::io)?;
    tmp.as_file().sync_data().map_err(RepoError::io)?;
    tmp.persist(&path)
        .map_err(|e| RepoError::io(e.error).with_context(format!("writing block {}", cid)))?;
    Ok(())
}

impl BlockStore for ObjectBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        let cid = *cid;
        self.blocking(move |root| read_object(root, &cid)).await
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = crate::mst::util::compute_cid(data)?;
        let data = Bytes::copy_from_slice(data);
        self.blocking(move |root| write_object(root, &cid, &data))
            .await?;
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        let cid = *cid;
        self.blocking(move |root| Ok(object_path(root, &cid).exists()))
            .await
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let blocks = verify_blocks(blocks.into_iter().collect())?;
        self.blocking(move |root| {
            for (cid, data) in &blocks {
                write_object(root, cid, data)?;
            }
            Ok(())
        })
        .await
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let cids = cids.to_vec();
        self.blocking(move |root| cids.iter().map(|cid| read_object(root, cid)).collect())
            .await
    }

    // Objects are independent files, so a crash mid-commit can leave some of the
    // commit's blocks behind. They are unreferenced until the head advances and get
    // swept like any other garbage.
    async fn apply_commit(&self, commit: &CommitData) -> Result<()> {
        self.put_many(
            commit
                .blocks
                .iter()
                .map(|(cid, data)| (*cid, data.clone()))
                .collect::<Vec<_>>(),
        )
        .await
    }

    async fn delete_unreferenced(&self, cids: &[IpldCid]) -> Result<usize> {
        let cids = cids.to_vec();
        self.blocking(move |root| {
            let mut removed = 0;
            for cid in &cids {
                match std::fs::remove_file(object_path(root, cid)) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(RepoError::io(e)),
                }
            }
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mst::util::compute_cid;

    #[tokio::test]
    async fn roundtrip_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectBlockStore::open(dir.path()).unwrap();

        let cid = store.put(b"object body").await.unwrap();
        assert!(object_path(dir.path(), &cid).is_file());
        assert_eq!(
            store.get(&cid).await.unwrap().as_deref(),
            Some(&b"object body"[..])
        );

        // no temp files left behind
        let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn missing_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectBlockStore::open(dir.path()).unwrap();
        let cid = compute_cid(b"absent").unwrap();
        assert!(store.get(&cid).await.unwrap().is_none());
        assert!(!store.has(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn tampered_batch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectBlockStore::open(dir.path()).unwrap();
        let cid = compute_cid(b"claimed").unwrap();
        let err = store
            .put_many(vec![(cid, Bytes::from_static(b"actual"))])
            .await
            .unwrap_err();
        assert_eq!(*err.kind(), crate::RepoErrorKind::InvalidCid);
        assert!(!store.has(&cid).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectBlockStore::open(dir.path()).unwrap();
        let cid = store.put(b"to delete").await.unwrap();
        assert_eq!(store.delete_unreferenced(&[cid, cid]).await.unwrap(), 1);
        assert!(!store.has(&cid).await.unwrap());
    }
}
