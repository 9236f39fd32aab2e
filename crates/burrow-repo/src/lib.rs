//! # burrow-repo
//!
//! Storage and synchronization primitives for content-addressed personal data repositories.
//!
//! ## Layers
//!
//! - [`storage`]: the [`BlockStore`](storage::BlockStore) capability (CID → bytes) with
//!   in-memory, embedded (`redb`) and directory object-store backends, plus a staging overlay
//! - [`mst`]: the Merkle Search Tree keyed by record path, with batch mutation, inversion and
//!   structural diffing
//! - [`commit`]: signed commit objects and the sync event shape emitted to subscribers
//! - [`car`]: CAR v1 import/export for block transfer
//! - [`repo`]: a repository handle tying tree, commit and storage together
//!
//! ## Example
//!
//! ```rust,ignore
//! use burrow_repo::{Repository, RecordWrite, storage::MemoryBlockStore};
//! use burrow_common::{Did, Ticker};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(MemoryBlockStore::new());
//! let key = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
//! let mut ticker = Ticker::new();
//!
//! let genesis = Repository::format_init_commit(
//!     storage.clone(),
//!     Did::new("did:plc:example")?,
//!     ticker.next(None),
//!     &key,
//! )
//! .await?;
//! let mut repo = Repository::create_from_commit(storage, genesis).await?;
//!
//! let writes = [RecordWrite::put("app.bsky.feed.post/abc", record_bytes)];
//! let rev = ticker.next(Some(repo.current_commit().rev()));
//! let commit = repo.format_commit(&writes, rev, &key).await?;
//! repo.apply_commit(commit).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod car;
pub mod commit;
pub mod error;
pub mod mst;
pub mod repo;
pub mod storage;

pub use commit::{Commit, SigningKey};
pub use error::{RepoError, RepoErrorKind, Result};
pub use mst::{Mst, MstDiff, Mutation};
pub use repo::{CommitData, RecordWrite, Repository};
pub use storage::BlockStore;

/// DAG-CBOR codec identifier for CIDs (0x71)
pub const DAG_CBOR_CID_CODEC: u64 = 0x71;

/// Raw codec identifier for CIDs (0x55), used for blobs
pub const RAW_CID_CODEC: u64 = 0x55;

/// SHA2-256 multihash code
pub const SHA2_256: u64 = 0x12;
