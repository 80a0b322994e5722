//! Proof verification.
//!
//! Pure functions, no tree required: the leaf is always re-derived from a
//! raw record, then folded upward through the proof with the same sorted-pair
//! hash used during construction.

use crate::{
    hash::{hash_pair, parse_hash, Hash},
    value::EntitlementRecord,
    ClaimTreeError, LeafEncoding, Result,
};

/// Fold `leaf` upward through `proof`, returning the implied root.
pub fn process_proof(leaf: Hash, proof: &[Hash]) -> Hash {
    proof
        .iter()
        .fold(leaf, |node, sibling| hash_pair(&node, sibling))
}

/// Check that `record` is committed under `root` via `proof`.
///
/// Returns `Ok(false)` for any mismatch (wrong value, wrong sibling, missing
/// or extra proof element) and for records that can never be a leaf under
/// `encoding`: an amount above `u128::MAX`, or a lockup the layout does not
/// have (or lacks one it needs). Errors only when `record` cannot be
/// normalized at all.
pub fn verify_proof(
    root: &Hash,
    encoding: LeafEncoding,
    record: &EntitlementRecord,
    proof: &[Hash],
) -> Result<bool> {
    let value = record.normalize()?;
    if encoding.check_shape(&value).is_err() {
        return Ok(false);
    }
    match encoding.leaf_hash(&value) {
        Ok(leaf) => Ok(process_proof(leaf, proof) == *root),
        Err(ClaimTreeError::Encoding { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// [`verify_proof`] over `0x`-prefixed hex digests.
///
/// Strings that are not 32-byte hex digests are a format error, not a
/// failed verification.
pub fn verify_hex<S: AsRef<str>>(
    root: &str,
    encoding: LeafEncoding,
    record: &EntitlementRecord,
    proof: &[S],
) -> Result<bool> {
    let root = parse_hash("root", root)?;
    let proof = proof
        .iter()
        .map(|sibling| parse_hash("proof", sibling.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    verify_proof(&root, encoding, record, &proof)
}
