//! Leaf byte layout and leaf digests.
//!
//! String fields are written as a little-endian `u32` byte length followed by
//! their UTF-8 bytes; the amount is a 16-byte little-endian `u128`. Field
//! order is fixed per [`LeafEncoding`] and recorded in every dump.

use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::{
    hash::{double_hash, Hash},
    value::{EntitlementRecord, NormalizedValue},
    ClaimTreeError, Result,
};

const ACCOUNT_FIELD: &str = "account:string";
const LOCKUP_FIELD: &str = "lockup:string";
const AMOUNT_FIELD: &str = "amount:u128";

/// The ordered field layout hashed into each leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LeafEncoding {
    /// `account`, `lockup`, `amount`.
    #[default]
    AccountLockupAmount,
    /// `account`, `amount`.
    AccountAmount,
}

impl LeafEncoding {
    /// Field descriptors, in encoding order, as written to `leafEncoding`.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            LeafEncoding::AccountLockupAmount => &[ACCOUNT_FIELD, LOCKUP_FIELD, AMOUNT_FIELD],
            LeafEncoding::AccountAmount => &[ACCOUNT_FIELD, AMOUNT_FIELD],
        }
    }

    /// Match a stored descriptor list against the known layouts.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Result<Self> {
        [LeafEncoding::AccountLockupAmount, LeafEncoding::AccountAmount]
            .into_iter()
            .find(|encoding| {
                let known = encoding.fields();
                known.len() == fields.len()
                    && known.iter().zip(fields).all(|(k, f)| *k == f.as_ref())
            })
            .ok_or_else(|| {
                let listed: Vec<&str> = fields.iter().map(|f| f.as_ref()).collect();
                ClaimTreeError::format(
                    "leafEncoding",
                    format!("unsupported leaf encoding [{}]", listed.join(", ")),
                )
            })
    }

    /// Check that a value carries exactly the fields this layout encodes.
    pub fn check_shape(&self, value: &NormalizedValue) -> Result<()> {
        match (self, value.lockup()) {
            (LeafEncoding::AccountLockupAmount, None) => Err(ClaimTreeError::format(
                "lockup",
                "lockup account is required by this leaf encoding",
            )),
            (LeafEncoding::AccountAmount, Some(_)) => Err(ClaimTreeError::format(
                "lockup",
                "lockup account is not part of this leaf encoding",
            )),
            _ => Ok(()),
        }
    }

    /// Serialize a normalized value into its leaf bytes.
    pub fn encode(&self, value: &NormalizedValue) -> Result<Vec<u8>> {
        self.check_shape(value)?;
        let amount = amount_to_u128(value.amount())?;

        let mut bytes = Vec::with_capacity(
            8 + value.account().len() + value.lockup().map_or(0, str::len) + 16,
        );
        write_string(&mut bytes, "account", value.account())?;
        if let Some(lockup) = value.lockup() {
            write_string(&mut bytes, "lockup", lockup)?;
        }
        bytes
            .write_u128::<LittleEndian>(amount)
            .map_err(|e| ClaimTreeError::encoding("amount", e.to_string()))?;
        Ok(bytes)
    }

    /// Leaf digest of an already normalized value: `H(H(encode(value)))`.
    pub fn leaf_hash(&self, value: &NormalizedValue) -> Result<Hash> {
        Ok(double_hash(&self.encode(value)?))
    }

    /// Normalize a raw record and compute its leaf digest.
    pub fn hash_record(&self, record: &EntitlementRecord) -> Result<(NormalizedValue, Hash)> {
        let value = record.normalize()?;
        let leaf = self.leaf_hash(&value)?;
        Ok((value, leaf))
    }
}

fn write_string(bytes: &mut Vec<u8>, field: &'static str, text: &str) -> Result<()> {
    let len = u32::try_from(text.len())
        .map_err(|_| ClaimTreeError::encoding(field, "string longer than u32::MAX bytes"))?;
    bytes
        .write_u32::<LittleEndian>(len)
        .and_then(|_| bytes.write_all(text.as_bytes()))
        .map_err(|e| ClaimTreeError::encoding(field, e.to_string()))
}

fn amount_to_u128(amount: &str) -> Result<u128> {
    let value = BigUint::parse_bytes(amount.as_bytes(), 10).ok_or_else(|| {
        ClaimTreeError::format("amount", format!("{:?} is not a decimal integer", amount))
    })?;
    u128::try_from(&value).map_err(|_| {
        ClaimTreeError::encoding("amount", format!("{} does not fit in 128 bits", amount))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::hash::hash_bytes;

    #[test]
    fn test_layout_with_lockup() {
        let value = EntitlementRecord::with_lockup("a.near", "b.near", "258")
            .normalize()
            .expect("normalize record");
        let bytes = LeafEncoding::AccountLockupAmount.encode(&value).expect("encode leaf");

        let mut expected = Vec::new();
        expected.extend_from_slice(&6u32.to_le_bytes());
        expected.extend_from_slice(b"a.near");
        expected.extend_from_slice(&6u32.to_le_bytes());
        expected.extend_from_slice(b"b.near");
        expected.extend_from_slice(&258u128.to_le_bytes());
        assert_eq!(bytes, expected);
        assert_eq!(bytes.len(), 4 + 6 + 4 + 6 + 16);
    }

    #[test]
    fn test_layout_without_lockup() {
        let value = EntitlementRecord::new("alice.near", "1")
            .normalize()
            .expect("normalize record");
        let bytes = LeafEncoding::AccountAmount.encode(&value).expect("encode leaf");
        assert_eq!(&bytes[..4], &10u32.to_le_bytes());
        assert_eq!(&bytes[4..14], b"alice.near");
        assert_eq!(&bytes[14..], &1u128.to_le_bytes());
    }

    #[test]
    fn test_leaf_hash_is_double_hash() {
        let value = EntitlementRecord::new("alice.near", "100")
            .normalize()
            .expect("normalize record");
        let bytes = LeafEncoding::AccountAmount.encode(&value).expect("encode leaf");
        let leaf = LeafEncoding::AccountAmount.leaf_hash(&value).expect("hash leaf");
        assert_eq!(leaf, hash_bytes(&hash_bytes(&bytes)));
    }

    #[test]
    fn test_amount_limits() {
        let max = u128::MAX.to_string();
        let value = EntitlementRecord::new("alice.near", max)
            .normalize()
            .expect("normalize record");
        assert!(LeafEncoding::AccountAmount.encode(&value).is_ok());

        let over = "340282366920938463463374607431768211456";
        let value = EntitlementRecord::new("alice.near", over)
            .normalize()
            .expect("normalize record");
        assert_matches!(
            LeafEncoding::AccountAmount.encode(&value),
            Err(ClaimTreeError::Encoding { field: "amount", .. })
        );
    }

    #[test]
    fn test_shape_must_match_encoding() {
        let without = EntitlementRecord::new("alice.near", "1")
            .normalize()
            .expect("normalize record");
        assert_matches!(
            LeafEncoding::AccountLockupAmount.encode(&without),
            Err(ClaimTreeError::Format { field: "lockup", .. })
        );
        let with = EntitlementRecord::with_lockup("alice.near", "l.near", "1")
            .normalize()
            .expect("normalize record");
        assert_matches!(
            LeafEncoding::AccountAmount.encode(&with),
            Err(ClaimTreeError::Format { field: "lockup", .. })
        );
    }

    #[test]
    fn test_equivalent_records_hash_identically() {
        let encoding = LeafEncoding::AccountLockupAmount;
        let (_, a) = encoding
            .hash_record(&EntitlementRecord::with_lockup("Alice.near", "0xAB", "5.9"))
            .expect("hash record");
        let (_, b) = encoding
            .hash_record(&EntitlementRecord::with_lockup("alice.NEAR", "ab", "0005"))
            .expect("hash record");
        assert_eq!(a, b);
    }

    #[test]
    fn test_descriptor_round_trip() {
        for encoding in [LeafEncoding::AccountLockupAmount, LeafEncoding::AccountAmount] {
            let parsed = LeafEncoding::from_fields(encoding.fields()).expect("known encoding");
            assert_eq!(parsed, encoding);
        }
        assert!(LeafEncoding::from_fields(&["amount:u128", "account:string"][..]).is_err());
        assert!(LeafEncoding::from_fields::<&str>(&[]).is_err());
    }
}
