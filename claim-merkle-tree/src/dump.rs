//! Storage-agnostic tree dump.
//!
//! ```json
//! {
//!   "format": "claim-merkle-v1",
//!   "tree": ["0x<root>", "..."],
//!   "values": [{"value": {"account": "...", "amount": "..."}, "treeIndex": 2}],
//!   "leafEncoding": ["account:string", "amount:u128"]
//! }
//! ```
//!
//! Loading checks structure and encoding compatibility but does not re-hash;
//! see [`MerkleTree::validate`] for a full integrity check.

use serde::{Deserialize, Serialize};

use crate::{
    hash::{parse_hash, to_hex},
    tree::{MerkleTree, MerkleValue},
    ClaimTreeError, LeafEncoding, Result,
};

/// Version tag of the dump layout. Any change to leaf encoding or node
/// hashing must change this tag.
pub const TREE_FORMAT: &str = "claim-merkle-v1";

/// Serialized form of a [`MerkleTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeDump {
    /// Layout version, always [`TREE_FORMAT`] when written by this crate.
    pub format: String,
    /// Node digests as `0x` hex, root first.
    pub tree: Vec<String>,
    /// Records in original input order.
    pub values: Vec<MerkleValue>,
    /// Field descriptors of the leaf layout. Required on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf_encoding: Option<Vec<String>>,
}

impl TreeDump {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ClaimTreeError::encoding("dump", format!("json error: {}", e)))
    }

    /// Parse JSON. Structural checks happen in [`MerkleTree::load`].
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ClaimTreeError::format("dump", format!("json error: {}", e)))
    }
}

impl MerkleTree {
    /// Dump the tree for storage.
    pub fn dump(&self) -> TreeDump {
        TreeDump {
            format: TREE_FORMAT.to_string(),
            tree: self.nodes().iter().map(to_hex).collect(),
            values: self.values().to_vec(),
            leaf_encoding: Some(
                self.encoding()
                    .fields()
                    .iter()
                    .map(|field| field.to_string())
                    .collect(),
            ),
        }
    }

    /// Rebuild a tree from a dump without re-hashing.
    ///
    /// Fails with a format error when the version tag differs, the leaf
    /// encoding is missing or unknown, the node count does not match the
    /// value count, a digest does not parse, or a value is not canonical,
    /// does not fit the encoding, or points outside the leaf slots.
    pub fn load(dump: TreeDump) -> Result<Self> {
        if dump.format != TREE_FORMAT {
            return Err(ClaimTreeError::format(
                "format",
                format!("expected {:?}, got {:?}", TREE_FORMAT, dump.format),
            ));
        }
        let fields = dump
            .leaf_encoding
            .ok_or_else(|| ClaimTreeError::format("leafEncoding", "leaf encoding is missing"))?;
        let encoding = LeafEncoding::from_fields(&fields)?;

        let count = dump.values.len();
        if count == 0 {
            return Err(ClaimTreeError::format("values", "dump holds no values"));
        }
        if dump.tree.len() != 2 * count - 1 {
            return Err(ClaimTreeError::format(
                "tree",
                format!(
                    "{} values need {} nodes, dump has {}",
                    count,
                    2 * count - 1,
                    dump.tree.len()
                ),
            ));
        }

        let tree = dump
            .tree
            .iter()
            .map(|text| parse_hash("tree", text))
            .collect::<Result<Vec<_>>>()?;

        let first_leaf = count - 1;
        let mut used = vec![false; count];
        for (position, entry) in dump.values.iter().enumerate() {
            entry
                .value
                .ensure_canonical()
                .and_then(|()| encoding.check_shape(&entry.value))
                .map_err(|e| e.at_record(position))?;
            let slot = entry
                .tree_index
                .checked_sub(first_leaf)
                .filter(|slot| *slot < count)
                .ok_or_else(|| ClaimTreeError::Format {
                    field: "treeIndex",
                    record: Some(position),
                    reason: format!(
                        "{} is not a leaf position ({}..{})",
                        entry.tree_index,
                        first_leaf,
                        tree.len()
                    ),
                })?;
            if std::mem::replace(&mut used[slot], true) {
                return Err(ClaimTreeError::Format {
                    field: "treeIndex",
                    record: Some(position),
                    reason: format!("leaf {} is claimed by two values", entry.tree_index),
                });
            }
        }

        Ok(MerkleTree::from_parts(tree, dump.values, encoding))
    }

    /// Serialize straight to dump JSON.
    pub fn to_json(&self) -> Result<String> {
        self.dump().to_json()
    }

    /// Load straight from dump JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        Self::load(TreeDump::from_json(text)?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{monitor::NoopObserver, BuildConfig, EntitlementRecord};

    fn sample_tree() -> MerkleTree {
        let records = vec![
            EntitlementRecord::new("alice.near", "100"),
            EntitlementRecord::new("bob.near", "200"),
            EntitlementRecord::new("charlie.near", "300"),
        ];
        MerkleTree::build_blocking(
            &records,
            LeafEncoding::AccountAmount,
            &BuildConfig::default(),
            &NoopObserver,
        )
        .expect("build tree")
    }

    #[test]
    fn test_dump_shape() {
        let text = sample_tree().to_json().expect("serialize json");
        let json: serde_json::Value = serde_json::from_str(&text).expect("parse json");
        assert_eq!(json["format"], TREE_FORMAT);
        assert_eq!(json["tree"].as_array().expect("tree array").len(), 5);
        assert_eq!(json["values"][1]["value"]["account"], "bob.near");
        assert!(json["values"][1]["treeIndex"].is_u64());
        assert_eq!(
            json["leafEncoding"],
            serde_json::json!(["account:string", "amount:u128"])
        );
    }

    #[test]
    fn test_load_restores_tree() {
        let tree = sample_tree();
        let text = tree.to_json().expect("serialize json");
        let loaded = MerkleTree::from_json(&text).expect("load dump");
        assert_eq!(loaded, tree);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_wrong_format_and_encoding() {
        let mut dump = sample_tree().dump();
        dump.format = "claim-merkle-v0".to_string();
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format { field: "format", .. })
        );

        let mut dump = sample_tree().dump();
        dump.leaf_encoding = None;
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format { field: "leafEncoding", .. })
        );

        let mut dump = sample_tree().dump();
        dump.leaf_encoding = Some(vec!["account:string".to_string()]);
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format { field: "leafEncoding", .. })
        );

        // values without lockup against a lockup encoding
        let mut dump = sample_tree().dump();
        dump.leaf_encoding = Some(
            LeafEncoding::AccountLockupAmount
                .fields()
                .iter()
                .map(|field| field.to_string())
                .collect(),
        );
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format {
                field: "lockup",
                record: Some(0),
                ..
            })
        );
    }

    #[test]
    fn test_load_rejects_bad_structure() {
        let mut dump = sample_tree().dump();
        dump.tree.pop();
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format { field: "tree", .. })
        );

        let mut dump = sample_tree().dump();
        dump.tree[3] = "0xzz".to_string();
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format { field: "tree", .. })
        );

        let mut dump = sample_tree().dump();
        dump.values[2].tree_index = 1;
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format {
                field: "treeIndex",
                record: Some(2),
                ..
            })
        );

        let mut dump = sample_tree().dump();
        dump.values[2].tree_index = dump.values[0].tree_index;
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format {
                field: "treeIndex",
                record: Some(2),
                ..
            })
        );

        let mut dump = sample_tree().dump();
        dump.values.clear();
        dump.tree.clear();
        assert_matches!(
            MerkleTree::load(dump),
            Err(ClaimTreeError::Format { field: "values", .. })
        );
    }

    #[test]
    fn test_load_rejects_non_canonical_values() {
        let text = sample_tree()
            .to_json()
            .expect("serialize json")
            .replace("\"bob.near\"", "\"Bob.near\"");
        assert_matches!(
            MerkleTree::from_json(&text),
            Err(ClaimTreeError::Format {
                field: "values",
                record: Some(1),
                ..
            })
        );
    }

    #[test]
    fn test_load_does_not_rehash() {
        let mut dump = sample_tree().dump();
        dump.tree[0] = to_hex(&[0u8; 32]);
        let loaded = MerkleTree::load(dump).expect("load dump");
        assert_eq!(loaded.root(), [0u8; 32]);
        assert!(loaded.validate().is_err());
    }
}
