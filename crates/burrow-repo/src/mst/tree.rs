//! Immutable Merkle Search Tree operations

use super::diff::MstDiff;
use super::node::{NodeData, NodeEntry};
use super::util;
use crate::error::{RepoError, Result};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A single change to apply to a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace `key` with `value`
    Put {
        /// Record key (collection/rkey)
        key: SmolStr,
        /// Record CID
        value: IpldCid,
    },
    /// Remove `key`; a no-op if the key is absent
    Delete {
        /// Record key (collection/rkey)
        key: SmolStr,
    },
}

impl Mutation {
    /// Put shorthand
    pub fn put(key: impl Into<SmolStr>, value: IpldCid) -> Self {
        Mutation::Put {
            key: key.into(),
            value,
        }
    }

    /// Delete shorthand
    pub fn delete(key: impl Into<SmolStr>) -> Self {
        Mutation::Delete { key: key.into() }
    }

    /// The key this mutation touches
    pub fn key(&self) -> &str {
        match self {
            Mutation::Put { key, .. } | Mutation::Delete { key } => key.as_str(),
        }
    }
}

/// Result of [`Mst::apply`]
#[derive(Debug, Clone)]
pub struct MstUpdate<S: BlockStore> {
    /// The new tree
    pub tree: Mst<S>,
    /// Root CID of the new tree
    pub root: IpldCid,
    /// MST node blocks present in the new tree but not in the old one
    pub blocks: BTreeMap<IpldCid, Bytes>,
    /// Record-level changes, with `new_mst_blocks` already moved into `blocks`
    pub diff: MstDiff,
}

/// Immutable Merkle Search Tree
///
/// Every mutating operation returns a new tree and leaves the original untouched, so
/// old and new versions can be diffed against each other.
///
/// Keys are hashed with SHA-256 and the count of leading zero bit pairs picks the
/// layer a key lives on. Two trees holding the same key/value set therefore have the
/// same shape, and the same root CID, regardless of insertion order.
///
/// Nodes are loaded lazily from the backing [`BlockStore`]. Nothing is written back
/// until [`Mst::persist`] is called or the caller stores the blocks from
/// [`Mst::apply`]/[`Mst::diff`].
#[derive(Debug, Clone)]
pub struct Mst<S: BlockStore> {
    storage: Arc<S>,

    /// `None` until loaded from storage
    entries: Arc<RwLock<Option<Vec<NodeEntry<S>>>>>,

    pointer: Arc<RwLock<IpldCid>>,

    /// `pointer` does not reflect `entries`
    outdated_pointer: Arc<RwLock<bool>>,

    /// Layer hint; `None` means derive it from the entries
    layer: Option<usize>,
}

impl<S: BlockStore + Sync + 'static> Mst<S> {
    /// Create empty MST
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            entries: Arc::new(RwLock::new(Some(Vec::new()))),
            pointer: Arc::new(RwLock::new(IpldCid::default())),
            outdated_pointer: Arc::new(RwLock::new(true)),
            layer: Some(0),
        }
    }

    /// Create MST with existing entries, computing (not persisting) its CID
    pub(crate) async fn create(
        storage: Arc<S>,
        entries: Vec<NodeEntry<S>>,
        layer: Option<usize>,
    ) -> Result<Self> {
        let node_data = util::serialize_node_data(&entries).await?;
        let (cid, _) = util::encode_node(&node_data)?;

        Ok(Self {
            storage,
            entries: Arc::new(RwLock::new(Some(entries))),
            pointer: Arc::new(RwLock::new(cid)),
            outdated_pointer: Arc::new(RwLock::new(false)),
            layer,
        })
    }

    /// Load MST from CID (lazy)
    ///
    /// Doesn't actually load from storage until entries are accessed.
    pub fn load(storage: Arc<S>, cid: IpldCid, layer: Option<usize>) -> Self {
        Self {
            storage,
            entries: Arc::new(RwLock::new(None)),
            pointer: Arc::new(RwLock::new(cid)),
            outdated_pointer: Arc::new(RwLock::new(false)),
            layer,
        }
    }

    /// Sibling tree with replaced entries; pointer recomputed on demand
    fn new_tree(&self, entries: Vec<NodeEntry<S>>) -> Self {
        Self {
            storage: self.storage.clone(),
            entries: Arc::new(RwLock::new(Some(entries))),
            pointer: Arc::new(RwLock::new(IpldCid::default())),
            outdated_pointer: Arc::new(RwLock::new(true)),
            layer: self.layer,
        }
    }

    pub(crate) async fn get_entries(&self) -> Result<Vec<NodeEntry<S>>> {
        {
            let entries_guard = self.entries.read().await;
            if let Some(ref entries) = *entries_guard {
                return Ok(entries.clone());
            }
        }

        let pointer = *self.pointer.read().await;
        let node_bytes = self
            .storage
            .get(&pointer)
            .await?
            .ok_or_else(|| RepoError::not_found("MST node", &pointer))?;

        let node_data: NodeData = serde_ipld_dagcbor::from_slice(&node_bytes)
            .map_err(|e| RepoError::serialization(e).with_context(format!("MST node {}", pointer)))?;

        let entries = util::deserialize_node_data(self.storage.clone(), &node_data, self.layer)?;

        *self.entries.write().await = Some(entries.clone());

        Ok(entries)
    }

    /// CID of this node, recomputed from entries if they changed
    pub async fn get_pointer(&self) -> Result<IpldCid> {
        if !*self.outdated_pointer.read().await {
            return Ok(*self.pointer.read().await);
        }

        let entries = self.get_entries().await?;
        let node_data = util::serialize_node_data(&entries).await?;
        let (cid, _) = util::encode_node(&node_data)?;

        *self.pointer.write().await = cid;
        *self.outdated_pointer.write().await = false;

        Ok(cid)
    }

    /// Root CID (alias for [`Mst::get_pointer`])
    pub async fn root(&self) -> Result<IpldCid> {
        self.get_pointer().await
    }

    /// Shared reference to the block storage
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Serialized form of this node
    pub(crate) async fn encode(&self) -> Result<(IpldCid, Bytes)> {
        let entries = self.get_entries().await?;
        let node_data = util::serialize_node_data(&entries).await?;
        util::encode_node(&node_data)
    }

    /// Layer of this node: the layer of its keys, or one above its first subtree
    pub(crate) fn get_layer(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            if let Some(layer) = self.layer {
                return Ok(layer);
            }

            let entries = self.get_entries().await?;
            if let Some(key) = entries.iter().find_map(NodeEntry::leaf_key) {
                return Ok(util::layer_for_key(key));
            }
            if let Some(NodeEntry::Tree(subtree)) = entries.iter().find(|e| e.is_tree()) {
                return Ok(subtree.get_layer().await? + 1);
            }

            Ok(0)
        })
    }

    /// Index of the first leaf >= key, or `entries.len()`
    fn find_gt_or_equal_leaf_index_in(entries: &[NodeEntry<S>], key: &str) -> usize {
        entries
            .iter()
            .position(|entry| matches!(entry.leaf_key(), Some(leaf) if leaf >= key))
            .unwrap_or(entries.len())
    }

    /// Get a value by key
    pub fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<IpldCid>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(&entries, key);

            if let Some(NodeEntry::Leaf {
                key: leaf_key,
                value,
            }) = entries.get(index)
            {
                if leaf_key.as_str() == key {
                    return Ok(Some(*value));
                }
            }

            if index > 0 {
                if let NodeEntry::Tree(subtree) = &entries[index - 1] {
                    return subtree.get(key).await;
                }
            }

            Ok(None)
        })
    }

    /// Insert or replace a key (returns new tree)
    pub fn add<'a>(&'a self, key: &'a str, cid: IpldCid) -> BoxFuture<'a, Mst<S>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let leaf = NodeEntry::Leaf {
                key: SmolStr::new(key),
                value: cid,
            };
            let key_layer = util::layer_for_key(key);
            let node_layer = self.get_layer().await?;
            let entries = self.get_entries().await?;

            if key_layer == node_layer {
                let index = Self::find_gt_or_equal_leaf_index_in(&entries, key);

                if let Some(NodeEntry::Leaf { key: existing, .. }) = entries.get(index) {
                    if existing.as_str() == key {
                        let mut new_entries = entries;
                        new_entries[index] = leaf;
                        return Ok(self.new_tree(new_entries));
                    }
                }

                match index.checked_sub(1).map(|prev| &entries[prev]) {
                    Some(NodeEntry::Tree(subtree)) => {
                        let (left, right) = subtree.split_around(key).await?;
                        self.replace_with_split(index - 1, left, leaf, right).await
                    }
                    _ => self.splice_in(leaf, index).await,
                }
            } else if key_layer < node_layer {
                let index = Self::find_gt_or_equal_leaf_index_in(&entries, key);

                if let Some(NodeEntry::Tree(prev_tree)) =
                    index.checked_sub(1).map(|prev| &entries[prev])
                {
                    let new_subtree = prev_tree.add(key, cid).await?;
                    return self
                        .update_entry(index - 1, NodeEntry::Tree(new_subtree))
                        .await;
                }

                let child = self.create_child().await?;
                let new_subtree = child.add(key, cid).await?;
                self.splice_in(NodeEntry::Tree(new_subtree), index).await
            } else {
                let extra_layers = key_layer - node_layer;
                let (mut left, mut right) = self.split_around(key).await?;

                for _ in 1..extra_layers {
                    if let Some(l) = left {
                        left = Some(l.create_parent().await?);
                    }
                    if let Some(r) = right {
                        right = Some(r.create_parent().await?);
                    }
                }

                let mut new_entries = Vec::with_capacity(3);
                new_entries.extend(left.map(NodeEntry::Tree));
                new_entries.push(leaf);
                new_entries.extend(right.map(NodeEntry::Tree));

                Mst::create(self.storage.clone(), new_entries, Some(key_layer)).await
            }
        })
    }

    /// Delete a key (returns new tree)
    ///
    /// Deleting a key that is not present returns an identical tree.
    pub fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Mst<S>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let Some(altered) = self.delete_recurse(key).await? else {
                return Ok(self.clone());
            };
            let trimmed = altered.trim_top().await?;
            // an emptied root forgets its layer so the next key starts from scratch
            if trimmed.get_entries().await?.is_empty() {
                return Ok(Mst::new(self.storage.clone()));
            }
            Ok(trimmed)
        })
    }

    /// `None` when the key is not in this subtree
    fn delete_recurse<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Mst<S>>> {
        Box::pin(async move {
            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(&entries, key);

            if let Some(NodeEntry::Leaf { key: leaf_key, .. }) = entries.get(index) {
                if leaf_key.as_str() == key {
                    let prev = index.checked_sub(1).map(|prev| &entries[prev]);
                    let next = entries.get(index + 1);

                    if let (Some(NodeEntry::Tree(prev_tree)), Some(NodeEntry::Tree(next_tree))) =
                        (prev, next)
                    {
                        let merged = prev_tree.append_merge(next_tree).await?;

                        let mut new_entries = entries[..index - 1].to_vec();
                        new_entries.push(NodeEntry::Tree(merged));
                        new_entries.extend_from_slice(&entries[index + 2..]);

                        return Ok(Some(self.new_tree(new_entries)));
                    }

                    return self.remove_entry(index).await.map(Some);
                }
            }

            if let Some(NodeEntry::Tree(prev_tree)) =
                index.checked_sub(1).map(|prev| &entries[prev])
            {
                let Some(subtree) = prev_tree.delete_recurse(key).await? else {
                    return Ok(None);
                };
                let altered = if subtree.get_entries().await?.is_empty() {
                    self.remove_entry(index - 1).await?
                } else {
                    self.update_entry(index - 1, NodeEntry::Tree(subtree)).await?
                };
                return Ok(Some(altered));
            }

            Ok(None)
        })
    }

    async fn update_entry(&self, index: usize, entry: NodeEntry<S>) -> Result<Mst<S>> {
        let mut entries = self.get_entries().await?;
        entries[index] = entry;
        Ok(self.new_tree(entries))
    }

    async fn remove_entry(&self, index: usize) -> Result<Mst<S>> {
        let mut entries = self.get_entries().await?;
        entries.remove(index);
        Ok(self.new_tree(entries))
    }

    async fn splice_in(&self, entry: NodeEntry<S>, index: usize) -> Result<Mst<S>> {
        let mut entries = self.get_entries().await?;
        entries.insert(index, entry);
        Ok(self.new_tree(entries))
    }

    /// Drop root nodes that only hold a single subtree
    fn trim_top(self) -> BoxFuture<'static, Mst<S>> {
        Box::pin(async move {
            let entries = self.get_entries().await?;
            if let [NodeEntry::Tree(subtree)] = entries.as_slice() {
                return subtree.clone().trim_top().await;
            }
            Ok(self)
        })
    }

    /// Split into (< key, >= key) halves; either side is `None` when empty
    pub fn split_around<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, (Option<Mst<S>>, Option<Mst<S>>)> {
        Box::pin(async move {
            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(&entries, key);

            let mut left_entries = entries[..index].to_vec();
            let mut right_entries = entries[index..].to_vec();

            if let Some(NodeEntry::Tree(last_tree)) = left_entries.last().cloned() {
                left_entries.pop();
                let (split_left, split_right) = last_tree.split_around(key).await?;
                left_entries.extend(split_left.map(NodeEntry::Tree));
                if let Some(sr) = split_right {
                    right_entries.insert(0, NodeEntry::Tree(sr));
                }
            }

            let wrap = |entries: Vec<NodeEntry<S>>| {
                (!entries.is_empty()).then(|| self.new_tree(entries))
            };
            Ok((wrap(left_entries), wrap(right_entries)))
        })
    }

    /// Concatenate with a tree whose keys are all greater than ours
    pub fn append_merge<'a>(&'a self, to_merge: &'a Mst<S>) -> BoxFuture<'a, Mst<S>> {
        Box::pin(async move {
            if self.get_layer().await? != to_merge.get_layer().await? {
                return Err(RepoError::invalid_mst(
                    "Cannot merge MST nodes from different layers",
                ));
            }

            let mut self_entries = self.get_entries().await?;
            let merge_entries = to_merge.get_entries().await?;

            if let (Some(NodeEntry::Tree(left_tree)), Some(NodeEntry::Tree(right_tree))) =
                (self_entries.last(), merge_entries.first())
            {
                let merged = left_tree.append_merge(right_tree).await?;
                self_entries.pop();
                self_entries.push(NodeEntry::Tree(merged));
                self_entries.extend_from_slice(&merge_entries[1..]);
                return Ok(self.new_tree(self_entries));
            }

            self_entries.extend(merge_entries);
            Ok(self.new_tree(self_entries))
        })
    }

    /// Empty child one layer down
    pub async fn create_child(&self) -> Result<Mst<S>> {
        let layer = self.get_layer().await?;
        Mst::create(self.storage.clone(), Vec::new(), Some(layer.saturating_sub(1))).await
    }

    /// Parent one layer up holding only `self`
    pub async fn create_parent(self) -> Result<Mst<S>> {
        let layer = self.get_layer().await?;
        let storage = self.storage.clone();
        Mst::create(storage, vec![NodeEntry::Tree(self)], Some(layer + 1)).await
    }

    /// Replace entry at index with [left?, leaf, right?]
    async fn replace_with_split(
        &self,
        index: usize,
        left: Option<Mst<S>>,
        leaf: NodeEntry<S>,
        right: Option<Mst<S>>,
    ) -> Result<Mst<S>> {
        let entries = self.get_entries().await?;

        let mut new_entries = entries[..index].to_vec();
        new_entries.extend(left.map(NodeEntry::Tree));
        new_entries.push(leaf);
        new_entries.extend(right.map(NodeEntry::Tree));
        new_entries.extend_from_slice(&entries[index + 1..]);

        Ok(self.new_tree(new_entries))
    }

    /// All (key, value) pairs in key order
    pub async fn leaves(&self) -> Result<Vec<(SmolStr, IpldCid)>> {
        let mut result = Vec::new();
        self.collect_leaves(&mut result).await?;
        Ok(result)
    }

    fn collect_leaves<'a>(&'a self, result: &'a mut Vec<(SmolStr, IpldCid)>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            for entry in self.get_entries().await? {
                match entry {
                    NodeEntry::Tree(subtree) => subtree.collect_leaves(result).await?,
                    NodeEntry::Leaf { key, value } => result.push((key, value)),
                }
            }
            Ok(())
        })
    }

    /// Replace the value of an existing key
    ///
    /// Fails with `NotFound` if the key is absent.
    pub async fn update(&self, key: &str, cid: IpldCid) -> Result<Mst<S>> {
        if self.get(key).await?.is_none() {
            return Err(RepoError::not_found("MST key", key));
        }
        self.add(key, cid).await
    }

    /// In-order walk starting strictly after `after`, stopping at `limit` leaves
    ///
    /// Subtrees that lie entirely at or before `after` are never loaded.
    pub async fn leaves_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(SmolStr, IpldCid)>> {
        let mut out = Vec::new();
        self.walk_after(after, limit, &mut out).await?;
        Ok(out)
    }

    fn walk_after<'a>(
        &'a self,
        after: Option<&'a str>,
        limit: usize,
        out: &'a mut Vec<(SmolStr, IpldCid)>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let entries = self.get_entries().await?;
            for (i, entry) in entries.iter().enumerate() {
                if out.len() >= limit {
                    break;
                }
                match entry {
                    NodeEntry::Leaf { key, value } => {
                        if after.is_none_or(|a| key.as_str() > a) {
                            out.push((key.clone(), *value));
                        }
                    }
                    NodeEntry::Tree(subtree) => {
                        let next_leaf = entries[i + 1..].iter().find_map(NodeEntry::leaf_key);
                        if let (Some(a), Some(next)) = (after, next_leaf) {
                            if next <= a {
                                continue;
                            }
                        }
                        subtree.walk_after(after, limit, out).await?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Node CIDs from the root down to `key`, followed by the record CID if present
    ///
    /// The result proves inclusion (or, without a trailing record CID, absence) of
    /// `key` to anyone holding those blocks.
    pub fn cids_for_path<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Vec<IpldCid>> {
        Box::pin(async move {
            util::validate_key(key)?;

            let mut cids = vec![self.get_pointer().await?];
            let entries = self.get_entries().await?;
            let index = Self::find_gt_or_equal_leaf_index_in(&entries, key);

            match entries.get(index) {
                Some(NodeEntry::Leaf {
                    key: leaf_key,
                    value,
                }) if leaf_key.as_str() == key => {
                    cids.push(*value);
                }
                _ => {
                    if let Some(NodeEntry::Tree(subtree)) =
                        index.checked_sub(1).map(|prev| &entries[prev])
                    {
                        cids.extend(subtree.cids_for_path(key).await?);
                    }
                }
            }

            Ok(cids)
        })
    }

    /// Apply a batch of mutations in order
    ///
    /// Pure with respect to storage: nothing is written. The returned blocks are exactly
    /// the MST nodes of the new tree that the old tree does not have, which is what a
    /// holder of the old root needs to reconstruct the new one. An empty batch (or one
    /// made only of deletes of absent keys) yields the same root and no blocks.
    pub async fn apply(&self, mutations: &[Mutation]) -> Result<MstUpdate<S>> {
        let mut tree = self.clone();
        for mutation in mutations {
            tree = match mutation {
                Mutation::Put { key, value } => tree.add(key, *value).await?,
                Mutation::Delete { key } => tree.delete(key).await?,
            };
        }

        let root = tree.get_pointer().await?;
        let mut diff = self.diff(&tree).await?;
        let blocks = std::mem::take(&mut diff.new_mst_blocks);
        Ok(MstUpdate {
            tree,
            root,
            blocks,
            diff,
        })
    }

    /// Mutations that undo `mutations` when applied to `apply(self, mutations)`
    ///
    /// One mutation per distinct touched key, restoring the value it has in `self`.
    pub async fn invert(&self, mutations: &[Mutation]) -> Result<Vec<Mutation>> {
        let mut seen = BTreeSet::new();
        let mut inverse = Vec::new();
        for mutation in mutations {
            let key = mutation.key();
            if !seen.insert(key.to_string()) {
                continue;
            }
            inverse.push(match self.get(key).await? {
                Some(value) => Mutation::put(key, value),
                None => Mutation::delete(key),
            });
        }
        Ok(inverse)
    }

    /// Gather the blocks of every node not yet in storage
    ///
    /// Stops descending at nodes the store already has.
    pub fn collect_blocks(&self) -> BoxFuture<'_, (IpldCid, BTreeMap<IpldCid, Bytes>)> {
        Box::pin(async move {
            let mut blocks = BTreeMap::new();
            let pointer = self.get_pointer().await?;

            if self.storage.has(&pointer).await? {
                return Ok((pointer, blocks));
            }

            let (_, bytes) = self.encode().await?;
            blocks.insert(pointer, bytes);

            for entry in self.get_entries().await? {
                if let NodeEntry::Tree(subtree) = entry {
                    let (_, subtree_blocks) = subtree.collect_blocks().await?;
                    blocks.extend(subtree_blocks);
                }
            }

            Ok((pointer, blocks))
        })
    }

    /// Write all unstored node blocks to storage, returning the root CID
    pub async fn persist(&self) -> Result<IpldCid> {
        let (root_cid, blocks) = self.collect_blocks().await?;
        if !blocks.is_empty() {
            self.storage.put_many(blocks).await?;
        }
        Ok(root_cid)
    }

    /// Every node CID and leaf value CID reachable from this tree
    pub fn reachable_cids<'a>(&'a self, out: &'a mut BTreeSet<IpldCid>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            out.insert(self.get_pointer().await?);
            for entry in self.get_entries().await? {
                match entry {
                    NodeEntry::Tree(subtree) => subtree.reachable_cids(out).await?,
                    NodeEntry::Leaf { value, .. } => {
                        out.insert(value);
                    }
                }
            }
            Ok(())
        })
    }

    /// Stream every node block, then every record block, into a CAR writer
    ///
    /// Record blocks missing from storage are skipped.
    pub async fn write_blocks_to_car<W: tokio::io::AsyncWrite + Send + Unpin>(
        &self,
        writer: &mut iroh_car::CarWriter<W>,
    ) -> Result<()> {
        let mut leaf_cids = Vec::new();
        self.write_mst_nodes_to_car(writer, &mut leaf_cids).await?;

        let leaf_blocks = self.storage.get_many(&leaf_cids).await?;
        for (cid, data) in leaf_cids.iter().zip(leaf_blocks) {
            if let Some(data) = data {
                writer.write(*cid, &data).await.map_err(RepoError::car)?;
            }
        }

        Ok(())
    }

    fn write_mst_nodes_to_car<'a, W: tokio::io::AsyncWrite + Send + Unpin>(
        &'a self,
        writer: &'a mut iroh_car::CarWriter<W>,
        leaf_cids: &'a mut Vec<IpldCid>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let (pointer, bytes) = self.encode().await?;
            writer.write(pointer, &bytes).await.map_err(RepoError::car)?;

            for entry in self.get_entries().await? {
                match entry {
                    NodeEntry::Leaf { value, .. } => leaf_cids.push(value),
                    NodeEntry::Tree(subtree) => {
                        subtree.write_mst_nodes_to_car(writer, leaf_cids).await?
                    }
                }
            }

            Ok(())
        })
    }
}
