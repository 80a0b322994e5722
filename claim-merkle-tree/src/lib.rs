//! Merkle trees over token entitlement records.
//!
//! Each record (account, optional lockup account, amount) is normalized,
//! encoded into a fixed byte layout and double-hashed with BLAKE3 to form a
//! leaf. Leaves are sorted by hash and laid out at the end of an implicit
//! binary tree of `2N - 1` nodes; every internal node hashes its two
//! children in ascending byte order:
//!
//! `leaf = blake3(blake3(encode(value)))`
//! `node = blake3(min(left, right) || max(left, right))`
//!
//! The root is independent of input order, and a proof is just the list of
//! sibling digests from a leaf to the root.

#![warn(missing_docs)]

mod config;
mod dump;
mod encoding;
mod error;
pub(crate) mod hash;
pub mod monitor;
pub(crate) mod proof;
pub mod store;
pub(crate) mod tree;
pub(crate) mod value;
mod verify;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::BuildConfig;
pub use dump::{TreeDump, TREE_FORMAT};
pub use encoding::LeafEncoding;
pub use error::{ClaimTreeError, Result};
pub use hash::{double_hash, hash_pair, parse_hash, to_hex, Hash, HASH_LENGTH};
pub use monitor::{BuildReport, BuildStage, NoopObserver, ResourceObserver};
#[cfg(feature = "process_monitor")]
pub use monitor::ProcessObserver;
pub use proof::{generate_proof, ClaimProof, MAX_PROOF_LENGTH};
pub use store::{fetch_proof, fetch_tree, publish, BlobStore};
pub use tree::{MerkleTree, MerkleValue};
pub use value::{
    ensure_unique_accounts, normalize_amount, normalize_identifier, EntitlementRecord,
    NormalizedValue, IMPLICIT_ACCOUNT_LENGTH,
};
pub use verify::{process_proof, verify_hex, verify_proof};
