//! Structural diff between two tree versions

use std::collections::{BTreeMap, HashMap};

use super::node::NodeEntry;
use super::tree::Mst;
use crate::commit::event::{OpAction, RepoOp};
use crate::error::Result;
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;

/// Changes that turn one tree into another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MstDiff {
    /// Keys only in the new tree (key, new CID)
    pub creates: Vec<(SmolStr, IpldCid)>,

    /// Keys in both with different values (key, new CID, old CID)
    pub updates: Vec<(SmolStr, IpldCid, IpldCid)>,

    /// Keys only in the old tree (key, old CID)
    pub deletes: Vec<(SmolStr, IpldCid)>,

    /// Record CIDs newly referenced by creates and updates
    pub new_leaf_cids: Vec<IpldCid>,

    /// Record CIDs no longer referenced after deletes and updates
    pub removed_cids: Vec<IpldCid>,

    /// Node blocks reachable from the new root but not the old one
    pub new_mst_blocks: BTreeMap<IpldCid, Bytes>,

    /// Node blocks reachable from the old root but not the new one
    pub removed_mst_blocks: Vec<IpldCid>,
}

impl MstDiff {
    /// Create empty diff
    pub fn new() -> Self {
        Self::default()
    }

    /// No record-level changes
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Count total operations
    pub fn op_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// Fetch the record blocks for creates and updates
    ///
    /// Records missing from storage are skipped.
    pub async fn fetch_new_blocks<S: BlockStore>(
        &self,
        storage: &S,
    ) -> Result<BTreeMap<IpldCid, Bytes>> {
        let found = storage.get_many(&self.new_leaf_cids).await?;
        Ok(self
            .new_leaf_cids
            .iter()
            .zip(found)
            .filter_map(|(cid, data)| data.map(|data| (*cid, data)))
            .collect())
    }

    /// Record operations in create, update, delete order
    pub fn to_repo_ops(&self) -> Vec<RepoOp> {
        let creates = self.creates.iter().map(|(key, cid)| RepoOp {
            action: OpAction::Create,
            path: key.clone(),
            cid: Some(*cid),
            prev: None,
        });
        let updates = self.updates.iter().map(|(key, cid, prev)| RepoOp {
            action: OpAction::Update,
            path: key.clone(),
            cid: Some(*cid),
            prev: Some(*prev),
        });
        let deletes = self.deletes.iter().map(|(key, prev)| RepoOp {
            action: OpAction::Delete,
            path: key.clone(),
            cid: None,
            prev: Some(*prev),
        });
        creates.chain(updates).chain(deletes).collect()
    }
}

/// Nodes still to compare at one layer
struct Frontier<S: BlockStore> {
    old: Vec<Mst<S>>,
    new: Vec<Mst<S>>,
}

impl<S: BlockStore> Default for Frontier<S> {
    fn default() -> Self {
        Self {
            old: Vec::new(),
            new: Vec::new(),
        }
    }
}

impl<S: BlockStore + Sync + 'static> Mst<S> {
    /// Diff from this tree to `other`
    ///
    /// Walks both trees one layer at a time from the top. Every node on a layer is keyed
    /// by CID; a CID present on both sides is a shared subtree and is never descended
    /// into. Nodes unique to one side contribute their blocks and leaves and queue their
    /// children for the layer below. Leaves collected from unique nodes are then
    /// matched by key, so a record that merely moved to a different node is not
    /// reported.
    pub async fn diff(&self, other: &Mst<S>) -> Result<MstDiff> {
        let mut diff = MstDiff::new();
        if self.get_pointer().await? == other.get_pointer().await? {
            return Ok(diff);
        }

        let mut layers: BTreeMap<usize, Frontier<S>> = BTreeMap::new();
        layers
            .entry(self.get_layer().await?)
            .or_default()
            .old
            .push(self.clone());
        layers
            .entry(other.get_layer().await?)
            .or_default()
            .new
            .push(other.clone());

        let mut old_leaves: BTreeMap<SmolStr, IpldCid> = BTreeMap::new();
        let mut new_leaves: BTreeMap<SmolStr, IpldCid> = BTreeMap::new();

        while let Some((layer, frontier)) = layers.pop_last() {
            let child_layer = layer.saturating_sub(1);
            let old_nodes = index_by_cid(frontier.old).await?;
            let new_nodes = index_by_cid(frontier.new).await?;

            for (cid, node) in &new_nodes {
                if old_nodes.contains_key(cid) {
                    continue;
                }
                let (_, bytes) = node.encode().await?;
                diff.new_mst_blocks.insert(*cid, bytes);

                for entry in node.get_entries().await? {
                    match entry {
                        NodeEntry::Leaf { key, value } => {
                            new_leaves.insert(key, value);
                        }
                        NodeEntry::Tree(subtree) => {
                            layers.entry(child_layer).or_default().new.push(subtree)
                        }
                    }
                }
            }

            for (cid, node) in &old_nodes {
                if new_nodes.contains_key(cid) {
                    continue;
                }
                diff.removed_mst_blocks.push(*cid);

                for entry in node.get_entries().await? {
                    match entry {
                        NodeEntry::Leaf { key, value } => {
                            old_leaves.insert(key, value);
                        }
                        NodeEntry::Tree(subtree) => {
                            layers.entry(child_layer).or_default().old.push(subtree)
                        }
                    }
                }
            }
        }

        for (key, cid) in new_leaves {
            match old_leaves.remove(&key) {
                None => {
                    diff.new_leaf_cids.push(cid);
                    diff.creates.push((key, cid));
                }
                Some(prev) if prev != cid => {
                    diff.new_leaf_cids.push(cid);
                    diff.removed_cids.push(prev);
                    diff.updates.push((key, cid, prev));
                }
                Some(_) => {}
            }
        }
        for (key, prev) in old_leaves {
            diff.removed_cids.push(prev);
            diff.deletes.push((key, prev));
        }

        Ok(diff)
    }

    /// Blocks a holder of `self` needs to materialize `other`
    ///
    /// New node blocks plus the record blocks for created and updated keys, read from
    /// `other`'s storage.
    pub async fn changed_blocks(&self, other: &Mst<S>) -> Result<BTreeMap<IpldCid, Bytes>> {
        let diff = self.diff(other).await?;
        let mut blocks = diff.fetch_new_blocks(other.storage().as_ref()).await?;
        blocks.extend(diff.new_mst_blocks);
        Ok(blocks)
    }
}

async fn index_by_cid<S: BlockStore + Sync + 'static>(
    nodes: Vec<Mst<S>>,
) -> Result<HashMap<IpldCid, Mst<S>>> {
    let mut indexed = HashMap::with_capacity(nodes.len());
    for node in nodes {
        indexed.insert(node.get_pointer().await?, node);
    }
    Ok(indexed)
}
