//! Inclusion proof generation and the per-record proof document.
//!
//! A proof is the list of sibling digests met while walking from a leaf to
//! the root. Because parents hash their children in sorted order, no
//! left/right flags are needed.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    hash::Hash, value::NormalizedValue, verify::verify_proof, ClaimTreeError, LeafEncoding,
    Result,
};

/// Longest proof accepted when decoding: a tree of 2^64 leaves.
pub const MAX_PROOF_LENGTH: usize = 64;

/// Collect sibling digests from `tree_index` up to the root of `tree`.
///
/// A level whose sibling slot lies outside the array contributes nothing,
/// so such proofs are shorter rather than padded.
pub fn generate_proof(tree: &[Hash], tree_index: usize) -> Result<Vec<Hash>> {
    if tree_index >= tree.len() {
        return Err(ClaimTreeError::Index {
            index: tree_index,
            len: tree.len(),
        });
    }

    let mut proof = Vec::new();
    let mut current = tree_index;
    while current > 0 {
        let sibling = if current % 2 == 0 {
            current - 1
        } else {
            current + 1
        };
        if let Some(hash) = tree.get(sibling) {
            proof.push(*hash);
        }
        current = (current - 1) / 2;
    }
    Ok(proof)
}

/// Proof document stored per claimant: `{value, treeIndex, proof}`.
///
/// In JSON, proof digests are `0x`-prefixed hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
#[serde(rename_all = "camelCase")]
pub struct ClaimProof {
    /// The committed record.
    pub value: NormalizedValue,
    /// Position of the record's leaf in the node array.
    pub tree_index: usize,
    /// Sibling digests, leaf level first.
    #[serde(with = "crate::hash::hex_list")]
    pub proof: Vec<Hash>,
}

impl ClaimProof {
    /// Check this proof against `root`, re-deriving the leaf from `value`.
    pub fn verify(&self, root: &Hash, encoding: LeafEncoding) -> Result<bool> {
        verify_proof(root, encoding, &self.value.clone().into(), &self.proof)
    }

    /// Encode to bytes using bincode.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_no_limit();
        bincode::encode_to_vec(self, config)
            .map_err(|e| ClaimTreeError::encoding("proof", format!("encode error: {}", e)))
    }

    /// Decode from bytes using bincode.
    ///
    /// Rejects proofs longer than [`MAX_PROOF_LENGTH`] and values that are
    /// not in canonical form.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<Self> {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_limit::<{ 1024 * 1024 }>(); // 1MB limit
        let (proof, _): (Self, _) = bincode::decode_from_slice(bytes, config)
            .map_err(|e| ClaimTreeError::format("proof", format!("decode error: {}", e)))?;
        proof.check()?;
        Ok(proof)
    }

    /// Serialize to the JSON proof document.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ClaimTreeError::encoding("proof", format!("json error: {}", e)))
    }

    /// Parse a JSON proof document.
    pub fn from_json(text: &str) -> Result<Self> {
        let proof: Self = serde_json::from_str(text)
            .map_err(|e| ClaimTreeError::format("proof", format!("json error: {}", e)))?;
        proof.check()?;
        Ok(proof)
    }

    fn check(&self) -> Result<()> {
        if self.proof.len() > MAX_PROOF_LENGTH {
            return Err(ClaimTreeError::format(
                "proof",
                format!(
                    "proof has {} elements, at most {} allowed",
                    self.proof.len(),
                    MAX_PROOF_LENGTH
                ),
            ));
        }
        self.value.ensure_canonical()
    }
}
