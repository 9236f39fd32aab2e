//! Read side of repository sync: listings, heads, full exports

use std::sync::Arc;

use burrow_common::{Did, Tid};
use burrow_repo::Repository;
use serde::{Deserialize, Serialize};

use crate::blobs::{BlobManager, BlobResponse};
use crate::blockstore::AnyBlockStore;
use crate::config::PaginationConfig;
use crate::cursor::Cursor;
use crate::error::{PdsError, Result};
use crate::meta::{MetaStore, RepoRecord};
use crate::status::RepoStatus;

/// One entry of a repository listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoItem {
    /// Repository DID
    pub did: Did,
    /// Head commit CID
    pub head: String,
    /// Head revision
    pub rev: Tid,
    /// Whether the repository is served
    pub active: bool,
    /// Present only when not active
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<RepoStatus>,
}

impl From<RepoRecord> for RepoItem {
    fn from(record: RepoRecord) -> Self {
        let active = record.status.is_active();
        Self {
            did: record.did,
            head: record.head.to_string(),
            rev: record.rev,
            active,
            status: (!active).then_some(record.status),
        }
    }
}

/// Page of repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListReposOutput {
    /// Absent on the last page
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor: Option<String>,
    /// Repositories, newest first
    pub repos: Vec<RepoItem>,
}

/// Page of blob CIDs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListBlobsOutput {
    /// Absent on the last page
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor: Option<String>,
    /// Blob CIDs, newest first
    pub cids: Vec<String>,
}

/// Head of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestCommit {
    /// Head commit CID
    pub cid: String,
    /// Head revision
    pub rev: Tid,
}

/// Hosting status of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatusOutput {
    /// Repository DID
    pub did: Did,
    /// Whether the repository is served
    pub active: bool,
    /// Present only when not active
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<RepoStatus>,
    /// Head revision, only while active
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rev: Option<Tid>,
}

/// Cursor-based enumeration for relays and other sync consumers
///
/// Reads never take a repository's write lock; they see the last committed head.
#[derive(Debug, Clone)]
pub struct SyncService {
    storage: Arc<AnyBlockStore>,
    meta: MetaStore,
    blobs: BlobManager,
    pagination: PaginationConfig,
}

impl SyncService {
    /// Sync surface over the given stores
    pub fn new(
        storage: Arc<AnyBlockStore>,
        meta: MetaStore,
        blobs: BlobManager,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            storage,
            meta,
            blobs,
            pagination,
        }
    }

    /// Hosted repositories, newest first; deleted ones are left out
    pub async fn list_repositories(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ListReposOutput> {
        let limit = self.pagination.repos_limit(limit);
        let cursor = cursor.map(str::parse::<Cursor>).transpose()?;
        let page = self.meta.list_repos(cursor, limit).await?;

        let cursor = if page.len() == limit {
            page.last().map(|r| r.cursor().to_string())
        } else {
            None
        };
        Ok(ListReposOutput {
            cursor,
            repos: page.into_iter().map(RepoItem::from).collect(),
        })
    }

    /// Blobs of one served repository, newest first
    ///
    /// A missing, deactivated, taken down or deleted repository is an input error named
    /// after its state.
    pub async fn list_blobs(
        &self,
        did: &Did,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ListBlobsOutput> {
        self.meta
            .get_active_repo(did)
            .await
            .map_err(PdsError::into_input)?;
        let limit = self.pagination.blobs_limit(limit);
        let cursor = cursor.map(str::parse::<Cursor>).transpose()?;

        let (cids, next) = self.blobs.list(did, cursor, limit).await?;
        Ok(ListBlobsOutput {
            cursor: next.map(|c| c.to_string()),
            cids: cids.into_iter().map(|cid| cid.to_string()).collect(),
        })
    }

    /// Current head of a served repository
    pub async fn get_latest_commit(&self, did: &Did) -> Result<LatestCommit> {
        let record = self.meta.get_active_repo(did).await?;
        Ok(LatestCommit {
            cid: record.head.to_string(),
            rev: record.rev,
        })
    }

    /// Status of a repository in any state but deleted
    pub async fn get_repo_status(&self, did: &Did) -> Result<RepoStatusOutput> {
        let record = self
            .meta
            .get_repo(did)
            .await?
            .filter(|r| r.status != RepoStatus::Deleted)
            .ok_or_else(|| PdsError::repo_not_found(did))?;
        let active = record.status.is_active();
        Ok(RepoStatusOutput {
            did: record.did,
            active,
            status: (!active).then_some(record.status),
            rev: active.then_some(record.rev),
        })
    }

    /// Full CAR export of a served repository at its head
    pub async fn get_repo(&self, did: &Did) -> Result<Vec<u8>> {
        let record = self.meta.get_active_repo(did).await?;
        let repo = Repository::from_commit(self.storage.clone(), &record.head).await?;
        Ok(repo.to_car_bytes().await?)
    }

    /// Blob bytes or a CDN redirect
    pub async fn get_blob(&self, did: &Did, cid: &str) -> Result<BlobResponse> {
        let cid = cid
            .parse()
            .map_err(|_| PdsError::input("InvalidRequest", format!("invalid CID: {cid}")))?;
        self.blobs.fetch(did, &cid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_page_has_no_cursor_field() {
        let out = ListBlobsOutput {
            cursor: None,
            cids: vec![],
        };
        assert_eq!(serde_json::to_string(&out).unwrap(), r#"{"cids":[]}"#);

        let out = ListReposOutput {
            cursor: Some("1::did:plc:x".into()),
            repos: vec![],
        };
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            serde_json::json!({"cursor": "1::did:plc:x", "repos": []})
        );
    }

    #[test]
    fn status_only_when_inactive() {
        let head = burrow_repo::mst::util::compute_cid(b"head").unwrap();
        let mut record = RepoRecord {
            did: Did::raw("did:plc:item"),
            head,
            rev: Tid::now(0),
            status: RepoStatus::Active,
            created_at: 1,
            signing_key: String::new(),
        };
        let json = serde_json::to_value(RepoItem::from(record.clone())).unwrap();
        assert_eq!(json["active"], true);
        assert!(json.get("status").is_none());
        assert_eq!(json["head"], head.to_string());

        record.status = RepoStatus::Takendown;
        let json = serde_json::to_value(RepoItem::from(record)).unwrap();
        assert_eq!(json["active"], false);
        assert_eq!(json["status"], "takendown");
    }
}
