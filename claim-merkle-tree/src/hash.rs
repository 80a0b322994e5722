//! BLAKE3 hashing primitives shared by construction, proof generation and
//! verification, plus the `0x`-prefixed hex form used in every artifact.

use crate::{ClaimTreeError, Result};

/// Size in bytes of every digest in the tree.
pub const HASH_LENGTH: usize = 32;

/// A 32-byte BLAKE3 digest.
pub type Hash = [u8; HASH_LENGTH];

/// Single BLAKE3 hash of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    *blake3::hash(bytes).as_bytes()
}

/// `H(H(bytes))`, used for leaves so a leaf can never be confused with an
/// internal node pre-image.
pub fn double_hash(bytes: &[u8]) -> Hash {
    hash_bytes(&hash_bytes(bytes))
}

/// Hash two child digests in ascending byte order.
///
/// Ordering the pair makes the parent independent of which child sits on the
/// left, so a proof only needs sibling values, not directions.
pub fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(low);
    hasher.update(high);
    *hasher.finalize().as_bytes()
}

/// Render a digest as `0x` followed by 64 lower-case hex characters.
pub fn to_hex(hash: &Hash) -> String {
    format!("0x{}", hex::encode(hash))
}

/// Parse a `0x`-prefixed (or bare) 64-character hex digest.
pub fn parse_hash(field: &'static str, text: &str) -> Result<Hash> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.len() != HASH_LENGTH * 2 {
        return Err(ClaimTreeError::format(
            field,
            format!(
                "expected {} hex characters, got {}",
                HASH_LENGTH * 2,
                digits.len()
            ),
        ));
    }
    let mut hash = [0u8; HASH_LENGTH];
    hex::decode_to_slice(digits, &mut hash)
        .map_err(|e| ClaimTreeError::format(field, format!("invalid hex digest: {}", e)))?;
    Ok(hash)
}

/// Serde adapter writing `Vec<Hash>` as a list of `0x`-prefixed hex strings.
pub(crate) mod hex_list {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use super::{parse_hash, to_hex, Hash};

    pub fn serialize<S: Serializer>(hashes: &[Hash], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(hashes.iter().map(to_hex))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Hash>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .iter()
            .map(|text| parse_hash("proof", text).map_err(D::Error::custom))
            .collect()
    }
}
