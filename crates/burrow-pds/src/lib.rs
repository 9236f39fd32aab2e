//! # burrow-pds
//!
//! Personal data server core built on [`burrow_repo`]: the per-repository commit
//! pipeline, blob storage, repository status, the sync read surface and the live commit
//! stream.
//!
//! ```rust,ignore
//! use burrow_pds::{Pds, config::Config};
//!
//! let pds = Pds::open(&Config::load("burrow.toml").await?)?;
//! let created = pds.create_repo(&did, &burrow_pds::keys::generate_key()).await?;
//! pds.apply_writes(&did, &[RecordWrite::put("app.bsky.feed.post/abc", record)], None).await?;
//! ```

#![warn(missing_docs)]

pub mod blobs;
pub mod blockstore;
pub mod config;
pub mod cursor;
pub mod error;
pub mod gc;
pub mod http;
pub mod keys;
pub mod meta;
pub mod pipeline;
pub mod rev;
pub mod sequencer;
pub mod status;
pub mod sync;

use std::ops::Deref;
use std::sync::Arc;

use burrow_common::Did;
use burrow_repo::Repository;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use error::{PdsError, Result};
pub use status::RepoStatus;

use crate::blobs::BlobManager;
use crate::blockstore::AnyBlockStore;
use crate::config::Config;
use crate::gc::GcReport;
use crate::keys::KeyStore;
use crate::meta::MetaStore;
use crate::pipeline::CommitPipeline;
use crate::sequencer::Sequencer;
use crate::sync::SyncService;

/// A running data server: stores, write pipeline and sync surface
///
/// Derefs to the [`CommitPipeline`] for the write operations.
#[derive(Debug)]
pub struct Pds {
    pipeline: CommitPipeline,
    blobs: BlobManager,
    sync: SyncService,
}

impl Pds {
    /// Open every store named in `config`
    pub fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let meta = MetaStore::persistent(config.meta_path())?;
        let storage = AnyBlockStore::open(config)?;
        Self::assemble(config, storage, meta)
    }

    /// Server with in-memory blocks and metadata; blob bytes and keys under `data_dir`
    pub fn in_memory(config: &Config) -> Result<Self> {
        let storage = AnyBlockStore::memory(config.storage_timeout());
        let meta = MetaStore::in_memory()?;
        Self::assemble(config, storage, meta)
    }

    fn assemble(config: &Config, storage: AnyBlockStore, meta: MetaStore) -> Result<Self> {
        let storage = Arc::new(storage);
        let blobs = BlobManager::open(
            config.blobs_dir(),
            meta.clone(),
            config.blob_cdn_url.clone(),
            config.max_blob_size,
        )?;
        let sequencer = Arc::new(Sequencer::new(config.sequencer_capacity));
        let pipeline = CommitPipeline::new(
            storage.clone(),
            meta.clone(),
            KeyStore::new(config.keys_dir()),
            sequencer,
        );
        let sync = SyncService::new(storage, meta, blobs.clone(), config.pagination.clone());
        Ok(Self {
            pipeline,
            blobs,
            sync,
        })
    }

    /// Blob storage
    pub fn blobs(&self) -> &BlobManager {
        &self.blobs
    }

    /// Sync read surface
    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    /// Repository `did` at its current head
    ///
    /// Fails unless the repository is active.
    pub async fn repository(&self, did: &Did) -> Result<Repository<AnyBlockStore>> {
        let record = self.pipeline.meta().get_active_repo(did).await?;
        Ok(Repository::from_commit(self.pipeline.storage().clone(), &record.head).await?)
    }

    /// One garbage collection pass
    pub async fn collect_garbage(&self) -> Result<GcReport> {
        gc::collect_garbage(&self.pipeline, &self.blobs).await
    }

    /// Serve the sync endpoints on `listener` until `cancel` fires
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        http::serve(listener, http::router(self.sync.clone()), cancel).await
    }
}

/// Open the server described by `config` and serve until Ctrl-C
///
/// Also runs a garbage collection pass every `gc_interval_secs`.
pub async fn run_with_config_until_ctrl_c(config: Config) -> Result<()> {
    let pds = Arc::new(Pds::open(&config)?);
    let rotation_key = config.rotation_key_file();
    match keys::rotation_did_key(&rotation_key).await? {
        Some(did_key) => info!(%did_key, "rotation key loaded"),
        None => warn!(path = %rotation_key.display(), "no rotation key, see create-rotation-key"),
    }
    let listener = TcpListener::bind(config.http.bind_addr).await?;
    let cancel = CancellationToken::new();

    let server = tokio::spawn({
        let pds = pds.clone();
        let cancel = cancel.clone();
        async move { pds.serve(listener, cancel).await }
    });
    let gc = tokio::spawn({
        let pds = pds.clone();
        let cancel = cancel.clone();
        let period = config.gc_interval();
        async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = pds.collect_garbage().await {
                            warn!(error = %err, "garbage collection failed");
                        }
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!(last_seq = pds.sequencer().current_seq().await, "shutdown");
    cancel.cancel();
    gc.await?;
    server.await?
}

impl Deref for Pds {
    type Target = CommitPipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}
