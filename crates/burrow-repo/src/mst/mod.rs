//! Merkle Search Tree implementation

pub mod diff;
pub mod node;
pub mod tree;
pub mod util;

pub use diff::MstDiff;
pub use node::{NodeData, NodeEntry, TreeEntry};
pub use tree::{Mst, MstUpdate, Mutation};
