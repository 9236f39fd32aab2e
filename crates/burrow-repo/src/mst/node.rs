//! MST node data structures

use std::fmt;

use bytes::Bytes;
use cid::Cid as IpldCid;
use smol_str::SmolStr;

use crate::{mst::Mst, storage::BlockStore};

/// Entry in an MST node: a subtree or a leaf
///
/// Nodes are held in memory as a flat, interleaved `Vec<NodeEntry>`
/// (`[Tree, Leaf, Tree, Leaf, Leaf, Tree]`), which keeps splitting and splicing simple.
/// The wire format is [`NodeData`].
#[derive(Clone)]
pub enum NodeEntry<S: BlockStore> {
    /// Subtree reference, loaded lazily from storage
    Tree(Mst<S>),

    /// Key/value pair
    Leaf {
        /// Full key (not prefix-compressed in memory)
        key: SmolStr,
        /// CID of the record value
        value: IpldCid,
    },
}

impl<S: BlockStore + fmt::Debug> fmt::Debug for NodeEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEntry::Tree(t) => write!(f, "{:?}", t),
            NodeEntry::Leaf { key, value } => {
                write!(f, "Leaf {{ key: {}, value: {} }}", key, value)
            }
        }
    }
}

impl<S: BlockStore> NodeEntry<S> {
    /// Check if this is a tree entry
    pub fn is_tree(&self) -> bool {
        matches!(self, NodeEntry::Tree(_))
    }

    /// Check if this is a leaf entry
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeEntry::Leaf { .. })
    }

    /// Get the key if this is a leaf
    pub fn leaf_key(&self) -> Option<&str> {
        match self {
            NodeEntry::Leaf { key, .. } => Some(key.as_str()),
            NodeEntry::Tree(_) => None,
        }
    }
}

/// Wire format entry: prefix-compressed leaf with optional right subtree
///
/// Field order (k, p, t, v) matches DAG-CBOR canonical map ordering.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TreeEntry {
    /// Key bytes after the shared prefix, encoded as a CBOR byte string
    #[serde(rename = "k", with = "crate::commit::serde_bytes_helper")]
    pub key_suffix: Bytes,

    /// Bytes shared with the previous key in the same node
    #[serde(rename = "p")]
    pub prefix_len: u8,

    /// Subtree holding keys between this entry and the next; explicit `null` when absent
    #[serde(rename = "t")]
    pub tree: Option<IpldCid>,

    /// CID of the record value
    #[serde(rename = "v")]
    pub value: IpldCid,
}

/// Wire format node (serialized as DAG-CBOR)
///
/// Optional fields serialize as explicit `null`; skipping them would change the bytes
/// and therefore the CID.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeData {
    /// Left-most subtree pointer
    #[serde(rename = "l")]
    pub left: Option<IpldCid>,

    /// Entries sorted by full key
    #[serde(rename = "e")]
    pub entries: Vec<TreeEntry>,
}

impl NodeData {
    /// Subtree pointers referenced by this node, left to right
    pub fn subtrees(&self) -> impl Iterator<Item = IpldCid> + '_ {
        self.left
            .into_iter()
            .chain(self.entries.iter().filter_map(|e| e.tree))
    }

    /// Record CIDs referenced by this node
    pub fn values(&self) -> impl Iterator<Item = IpldCid> + '_ {
        self.entries.iter().map(|e| e.value)
    }
}
