//! Hashing, key validation and wire-format conversion for MST nodes

use super::node::{NodeData, NodeEntry, TreeEntry};
use crate::error::{MstError, Result};
use crate::storage::BlockStore;
use crate::{DAG_CBOR_CID_CODEC, SHA2_256};
use bytes::Bytes;
use cid::Cid as IpldCid;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 256;

/// CIDv1 of `data` with a sha2-256 multihash and the given codec
pub fn cid_for_codec(codec: u64, data: &[u8]) -> Result<IpldCid> {
    cid_from_sha256(codec, &Sha256::digest(data))
}

/// CIDv1 from an already computed sha2-256 digest
pub fn cid_from_sha256(codec: u64, digest: &[u8]) -> Result<IpldCid> {
    let mh = multihash::Multihash::<64>::wrap(SHA2_256, digest)
        .map_err(|e| MstError::InvalidNode(e.to_string()))?;
    Ok(IpldCid::new_v1(codec, mh))
}

/// DAG-CBOR CID of already-encoded bytes
pub fn compute_cid(data: &[u8]) -> Result<IpldCid> {
    cid_for_codec(DAG_CBOR_CID_CODEC, data)
}

/// Encode a node to DAG-CBOR, returning its CID and bytes
pub fn encode_node(node: &NodeData) -> Result<(IpldCid, Bytes)> {
    let cbor =
        serde_ipld_dagcbor::to_vec(node).map_err(|e| MstError::Serialization(Box::new(e)))?;
    let cid = compute_cid(&cbor)?;
    Ok((cid, Bytes::from(cbor)))
}

/// Layer of a key: leading zero bits of sha256(key), counted in pairs
///
/// Gives an expected fanout of 4.
pub fn layer_for_key(key: &str) -> usize {
    let hash = Sha256::digest(key.as_bytes());
    leading_zeros(&hash) / 2
}

fn leading_zeros(hash: &[u8]) -> usize {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros() as usize;
            break;
        }
    }
    count
}

/// Validate an MST key
///
/// Non-empty, at most [`MAX_KEY_LEN`] bytes, characters from `[a-zA-Z0-9._:~/-]`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MstError::EmptyKey.into());
    }

    if key.len() > MAX_KEY_LEN {
        return Err(MstError::KeyTooLong {
            len: key.len(),
            max: MAX_KEY_LEN,
        }
        .into());
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-' | '/'))
    {
        return Err(MstError::InvalidKeyChars {
            key: key.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Length of the shared byte prefix of two keys
pub fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}

/// Flat in-memory entries to prefix-compressed wire form
///
/// A leading `Tree` becomes the `l` pointer; a `Tree` following a `Leaf` becomes that
/// leaf's `t` pointer. Two adjacent `Tree`s are a structural error.
pub fn serialize_node_data<'a, S: BlockStore + Sync + 'static>(
    entries: &'a [NodeEntry<S>],
) -> Pin<Box<dyn Future<Output = Result<NodeData>> + Send + 'a>> {
    Box::pin(async move {
        let mut data = NodeData {
            left: None,
            entries: Vec::new(),
        };

        let mut rest = entries;
        if let Some((NodeEntry::Tree(tree), tail)) = rest.split_first() {
            data.left = Some(tree.get_pointer().await?);
            rest = tail;
        }

        let mut last_key: &str = "";
        while let Some((entry, tail)) = rest.split_first() {
            let NodeEntry::Leaf { key, value } = entry else {
                return Err(MstError::InvalidNode("two subtrees adjacent in node".into()).into());
            };
            rest = tail;

            let tree = match rest.split_first() {
                Some((NodeEntry::Tree(tree), tail)) => {
                    rest = tail;
                    Some(tree.get_pointer().await?)
                }
                _ => None,
            };

            let prefix_len = common_prefix_len(last_key, key);
            data.entries.push(TreeEntry {
                prefix_len: prefix_len.try_into().map_err(|_| {
                    MstError::InvalidNode(format!("prefix length {} exceeds u8::MAX", prefix_len))
                })?,
                key_suffix: Bytes::copy_from_slice(&key.as_bytes()[prefix_len..]),
                tree,
                value: *value,
            });
            last_key = key.as_str();
        }

        Ok(data)
    })
}

/// Wire form back to flat entries, with lazily loaded subtrees
pub fn deserialize_node_data<S: BlockStore + Sync + 'static>(
    storage: Arc<S>,
    data: &NodeData,
    layer: Option<usize>,
) -> Result<Vec<NodeEntry<S>>> {
    use crate::mst::Mst;

    let child_layer = layer.map(|l| l.saturating_sub(1));
    let mut entries = Vec::with_capacity(data.entries.len() * 2 + 1);

    if let Some(left) = data.left {
        entries.push(NodeEntry::Tree(Mst::load(storage.clone(), left, child_layer)));
    }

    let mut last_key = String::new();
    for entry in &data.entries {
        let suffix = std::str::from_utf8(&entry.key_suffix)
            .map_err(|e| MstError::InvalidNode(format!("invalid UTF-8 in key suffix: {}", e)))?;
        let prefix_len = entry.prefix_len as usize;
        let prefix = last_key.get(..prefix_len).ok_or_else(|| {
            MstError::InvalidNode(format!(
                "prefix length {} longer than previous key",
                prefix_len
            ))
        })?;
        let full_key = format!("{}{}", prefix, suffix);

        entries.push(NodeEntry::Leaf {
            key: SmolStr::new(&full_key),
            value: entry.value,
        });
        last_key = full_key;

        if let Some(tree) = entry.tree {
            entries.push(NodeEntry::Tree(Mst::load(storage.clone(), tree, child_layer)));
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_valid() {
        assert!(validate_key("app.bsky.feed.post/abc123").is_ok());
        assert!(validate_key("foo.bar/test-key_2024").is_ok());
        assert!(validate_key("a").is_ok());
        assert!(validate_key("com.example.record/3jui7kd54zh2y").is_ok());
    }

    #[test]
    fn test_validate_key_rejects() {
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(validate_key("key with spaces").is_err());
        assert!(validate_key("key@invalid").is_err());
        assert!(validate_key("ünïcode").is_err());
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len("hello", "help"), 3);
        assert_eq!(common_prefix_len("abc", "abc"), 3);
        assert_eq!(common_prefix_len("abc", "def"), 0);
        assert_eq!(common_prefix_len("", "test"), 0);
    }

    #[test]
    fn test_layer_for_key_known_values() {
        // interop fixtures from the atproto MST test suite
        assert_eq!(layer_for_key("2653ae71"), 0);
        assert_eq!(layer_for_key("blue"), 1);
        assert_eq!(layer_for_key("app.bsky.feed.post/454397e440ec"), 4);
        assert_eq!(layer_for_key("app.bsky.feed.post/9adeb165882c"), 8);
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(leading_zeros(&[0, 0, 0, 1]), 31);
        assert_eq!(leading_zeros(&[0xFF, 0, 0]), 0);
        assert_eq!(leading_zeros(&[0, 0x80]), 8);
        assert_eq!(leading_zeros(&[0, 0x01]), 15);
    }

    #[test]
    fn test_cid_codecs_differ() {
        let raw = cid_for_codec(crate::RAW_CID_CODEC, b"blob").unwrap();
        let cbor = compute_cid(b"blob").unwrap();
        assert_ne!(raw, cbor);
        assert_eq!(raw.hash(), cbor.hash());
    }
}
