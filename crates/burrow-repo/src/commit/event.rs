//! Sync events emitted once per commit
//!
//! A [`CommitEvent`] is what a subscriber needs to follow a repository without
//! re-fetching it: the commit, the record operations it performed, and a CAR holding
//! the commit block plus every block the commit introduced.

use super::Commit;
use crate::car::parse_car_bytes;
use crate::error::{RepoError, Result};
use crate::mst::{Mst, Mutation};
use crate::storage::{BlockStore, LayeredBlockStore, MemoryBlockStore};
use burrow_common::{Did, PublicKey, Tid};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cid::Cid as IpldCid;
use smol_str::SmolStr;
use std::sync::Arc;

/// Kind of record operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpAction {
    /// Record created
    Create,
    /// Record replaced
    Update,
    /// Record removed
    Delete,
}

/// A single record operation
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RepoOp {
    /// Operation kind
    pub action: OpAction,

    /// Record path (`collection/rkey`)
    pub path: SmolStr,

    /// New record CID; `None` for deletes
    pub cid: Option<IpldCid>,

    /// Previous record CID; `None` for creates
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev: Option<IpldCid>,
}

impl RepoOp {
    /// Tree mutation that replays this operation
    pub fn to_mutation(&self) -> Mutation {
        match (self.action, self.cid) {
            (OpAction::Delete, _) | (_, None) => Mutation::delete(self.path.clone()),
            (_, Some(cid)) => Mutation::put(self.path.clone(), cid),
        }
    }
}

/// Commit notification for sync subscribers
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEvent {
    /// Stream sequence number, assigned by the sequencer
    pub seq: u64,

    /// Repository the commit belongs to
    pub repo: Did,

    /// CID of the commit block
    pub commit: IpldCid,

    /// Revision of the commit
    pub rev: Tid,

    /// Revision of the previous commit; `None` for genesis
    pub since: Option<Tid>,

    /// CAR v1 rooted at `commit`
    #[serde(with = "super::serde_bytes_helper")]
    pub blocks: Bytes,

    /// Record operations, creates then updates then deletes
    pub ops: Vec<RepoOp>,

    /// MST root before this commit
    pub prev_data: Option<IpldCid>,

    /// When the event was produced
    pub time: DateTime<Utc>,
}

impl CommitEvent {
    /// Check this event against the subscriber's copy of the previous state
    ///
    /// Reads blocks from the event first and `prev_storage` second, verifies the commit
    /// signature, checks each op's `prev` against the previous tree, replays the ops and
    /// compares the result with the commit's claimed root. Returns the verified commit.
    pub async fn verify<S: BlockStore + Sync + 'static>(
        &self,
        prev_storage: Arc<S>,
        pubkey: &PublicKey,
    ) -> Result<Commit> {
        let parsed = parse_car_bytes(&self.blocks).await?;
        if parsed.root() != self.commit {
            return Err(RepoError::invalid_commit(format!(
                "CAR root {} is not the event commit {}",
                parsed.root(),
                self.commit
            )));
        }

        let overlay = MemoryBlockStore::new_from_blocks(parsed.blocks);
        let storage = Arc::new(LayeredBlockStore::new(overlay, prev_storage));

        let commit_bytes = crate::storage::get_required(storage.as_ref(), &self.commit).await?;
        let commit = Commit::from_cbor(&commit_bytes)?;
        if commit.did() != &self.repo || commit.rev() != &self.rev {
            return Err(RepoError::invalid_commit(format!(
                "event for {} at {} carries commit for {} at {}",
                self.repo,
                self.rev,
                commit.did(),
                commit.rev()
            )));
        }
        commit.verify(pubkey)?;

        let prev_tree = match self.prev_data {
            Some(root) => Mst::load(storage.clone(), root, None),
            None => Mst::new(storage.clone()),
        };

        for op in &self.ops {
            let current = prev_tree.get(&op.path).await?;
            if current != op.prev {
                return Err(RepoError::invalid_commit(format!(
                    "op on {} claims prev {:?}, tree has {:?}",
                    op.path, op.prev, current
                )));
            }
        }

        let mutations: Vec<Mutation> = self.ops.iter().map(RepoOp::to_mutation).collect();
        let computed = prev_tree.apply(&mutations).await?;
        if computed.root != *commit.data() {
            return Err(RepoError::invalid_mst(format!(
                "replayed root {} does not match commit data {}",
                computed.root,
                commit.data()
            )));
        }

        Ok(commit)
    }
}
