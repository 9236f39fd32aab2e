//! Blob storage
//!
//! Blob bytes live in one file per CID under the blob directory, sharded like the object
//! block store. Ownership and listing order live in the metadata store. Uploads are
//! written to a temp file and renamed into place once fully hashed, so an aborted or
//! rejected upload leaves nothing behind.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use burrow_common::Did;
use burrow_repo::RAW_CID_CODEC;
use burrow_repo::mst::util::cid_for_codec;
use bytes::Bytes;
use cid::Cid as IpldCid;
use n0_future::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::cursor::Cursor;
use crate::error::{PdsError, Result};
use crate::meta::MetaStore;

/// Reference to a stored blob, as embedded in records
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRef {
    /// Raw-codec CID
    pub cid: IpldCid,
    /// Declared media type
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
}

/// Result of a blob fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobResponse {
    /// Serve these bytes
    Bytes {
        /// Blob content
        data: Bytes,
        /// Media type recorded at upload
        mime: String,
        /// Length of `data`
        size: u64,
    },
    /// Send the client elsewhere
    Redirect {
        /// CDN location
        url: Url,
    },
}

/// Stores, serves and lists blobs
#[derive(Debug, Clone)]
pub struct BlobManager {
    root: PathBuf,
    meta: MetaStore,
    /// Uploads hold it shared from placing the file until the owner row is written;
    /// deletion holds it exclusively
    files: Arc<RwLock<()>>,
    cdn: Option<Url>,
    max_size: usize,
}

impl BlobManager {
    /// Blob manager storing bytes under `root`
    pub fn open(
        root: impl Into<PathBuf>,
        meta: MetaStore,
        cdn: Option<Url>,
        max_size: usize,
    ) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("blobs"))?;
        std::fs::create_dir_all(root.join("tmp"))?;
        Ok(Self {
            root,
            meta,
            files: Arc::new(RwLock::new(())),
            cdn,
            max_size,
        })
    }

    /// Largest accepted blob
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn blob_path(&self, cid: &IpldCid) -> PathBuf {
        let name = cid.to_string();
        let shard = &name[name.len().saturating_sub(2)..];
        self.root.join("blobs").join(shard).join(name)
    }

    fn too_large(size: usize, max: usize) -> PdsError {
        PdsError::input(
            "BlobTooLarge",
            format!("blob is {size} bytes, max {max}"),
        )
    }

    /// Store a complete blob for `owner`
    #[tracing::instrument(skip(self, data), fields(%owner, size = data.len()))]
    pub async fn store(&self, data: Bytes, mime_type: &str, owner: &Did) -> Result<BlobRef> {
        self.meta.get_active_repo(owner).await?;
        if data.len() > self.max_size {
            return Err(Self::too_large(data.len(), self.max_size));
        }

        let cid = cid_for_codec(RAW_CID_CODEC, &data)?;
        let path = self.blob_path(&cid);
        let tmp_dir = self.root.join("tmp");
        let to_write = data.clone();
        let _files = self.files.read().await;
        tokio::task::spawn_blocking(move || write_blob_file(&tmp_dir, &path, &to_write)).await??;

        self.record(owner, cid, mime_type, data.len() as u64).await
    }

    /// Store a blob arriving in chunks
    ///
    /// Hashes while writing and stops as soon as more than `max_size` bytes (capped at the
    /// configured maximum) have arrived. Partial data is discarded on any error, and when
    /// the returned future is dropped before completion.
    #[tracing::instrument(skip(self, stream), fields(%owner))]
    pub async fn store_stream<St, E>(
        &self,
        mut stream: St,
        mime_type: &str,
        owner: &Did,
        max_size: usize,
    ) -> Result<BlobRef>
    where
        St: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.meta.get_active_repo(owner).await?;
        let max_size = max_size.min(self.max_size);

        let tmp = tempfile::NamedTempFile::new_in(self.root.join("tmp"))?;
        let (file, tmp_path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = Sha256::new();
        let mut size = 0usize;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(PdsError::storage)?;
            size += chunk.len();
            if size > max_size {
                debug!(size, max_size, "upload exceeded size limit");
                return Err(Self::too_large(size, max_size));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let cid = burrow_repo::mst::util::cid_from_sha256(RAW_CID_CODEC, &hasher.finalize())?;
        let path = self.blob_path(&cid);
        let _files = self.files.read().await;
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if path.exists() {
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tmp_path.persist(&path).map_err(|e| e.error)
        })
        .await??;

        self.record(owner, cid, mime_type, size as u64).await
    }

    async fn record(&self, owner: &Did, cid: IpldCid, mime_type: &str, size: u64) -> Result<BlobRef> {
        let (record, created) = self.meta.put_blob(owner, cid, mime_type, size).await?;
        debug!(%cid, created, "stored blob");
        Ok(BlobRef {
            cid: record.cid,
            mime_type: record.mime_type,
            size: record.size,
        })
    }

    /// Fetch a blob of `did`
    ///
    /// The repository status is checked on every call, before any bytes are read.
    pub async fn fetch(&self, did: &Did, cid: &IpldCid) -> Result<BlobResponse> {
        self.meta.get_active_repo(did).await?;
        let record = self
            .meta
            .get_blob(did, cid)
            .await?
            .ok_or_else(|| PdsError::blob_not_found(cid))?;

        if let Some(cdn) = &self.cdn {
            let url = format!("{}/blobs/{}/{}", cdn.as_str().trim_end_matches('/'), did, cid);
            let url = Url::parse(&url)
                .map_err(|e| PdsError::input("InvalidRequest", e.to_string()))?;
            return Ok(BlobResponse::Redirect { url });
        }

        match tokio::fs::read(self.blob_path(cid)).await {
            Ok(data) => Ok(BlobResponse::Bytes {
                size: data.len() as u64,
                data: Bytes::from(data),
                mime: record.mime_type,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(%did, %cid, "blob metadata present but bytes missing");
                Err(PdsError::blob_not_found(cid))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Blob CIDs of `did`, newest first
    ///
    /// The returned cursor is set only when the page is full.
    pub async fn list(
        &self,
        did: &Did,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<(Vec<IpldCid>, Option<Cursor>)> {
        let page = self.meta.list_blobs(did, cursor, limit).await?;
        let next = if page.len() == limit {
            page.last().map(|b| b.cursor())
        } else {
            None
        };
        Ok((page.into_iter().map(|b| b.cid).collect(), next))
    }

    /// Remove a blob nobody but deleted repositories owns any more
    ///
    /// Returns `false`, leaving bytes and metadata alone, when a live repository owns
    /// `cid` by the time the removal runs.
    pub async fn delete(&self, cid: &IpldCid) -> Result<bool> {
        let _files = self.files.write().await;
        if !self.meta.purge_orphaned_blob(cid).await? {
            debug!(%cid, "blob has a live owner, keeping it");
            return Ok(false);
        }
        match tokio::fs::remove_file(self.blob_path(cid)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(%cid, "purged blob had no bytes on disk");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn write_blob_file(tmp_dir: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = tempfile::NamedTempFile::new_in(tmp_dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
