//! Entitlement records and their canonical form.
//!
//! Normalization is what lets equivalent inputs hash identically:
//! identifiers are lower-cased and implicit (hex) accounts are padded to 64
//! characters, amounts are reduced to a canonical decimal integer.

use std::collections::HashMap;

use bincode::{Decode, Encode};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ClaimTreeError, Result};

/// Length of a NEAR implicit account identifier in hex characters.
pub const IMPLICIT_ACCOUNT_LENGTH: usize = 64;

/// One raw entitlement as supplied by the upload layer.
///
/// `lockup` is present for trees using
/// [`LeafEncoding::AccountLockupAmount`](crate::LeafEncoding) and absent for
/// [`LeafEncoding::AccountAmount`](crate::LeafEncoding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntitlementRecord {
    /// Claimant account.
    pub account: String,
    /// Lockup account holding the tokens, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockup: Option<String>,
    /// Decimal amount; a fractional part is truncated.
    pub amount: String,
}

impl EntitlementRecord {
    /// A record without a lockup account.
    pub fn new(account: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            lockup: None,
            amount: amount.into(),
        }
    }

    /// A record with a lockup account.
    pub fn with_lockup(
        account: impl Into<String>,
        lockup: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            lockup: Some(lockup.into()),
            amount: amount.into(),
        }
    }

    /// Canonicalize this record.
    pub fn normalize(&self) -> Result<NormalizedValue> {
        Ok(NormalizedValue {
            account: normalize_identifier("account", &self.account)?,
            lockup: self
                .lockup
                .as_deref()
                .map(|lockup| normalize_identifier("lockup", lockup))
                .transpose()?,
            amount: normalize_amount(&self.amount)?,
        })
    }
}

/// A record in canonical form, ready for leaf encoding.
///
/// Only produced by [`EntitlementRecord::normalize`] or by loading a dump
/// whose values were checked to already be canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct NormalizedValue {
    account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lockup: Option<String>,
    amount: String,
}

impl NormalizedValue {
    /// Canonical account identifier.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Canonical lockup identifier, if the record has one.
    pub fn lockup(&self) -> Option<&str> {
        self.lockup.as_deref()
    }

    /// Canonical decimal amount.
    pub fn amount(&self) -> &str {
        &self.amount
    }

    /// Check that a deserialized value is already canonical.
    pub(crate) fn ensure_canonical(&self) -> Result<()> {
        let renormalized = EntitlementRecord::from(self.clone()).normalize()?;
        if &renormalized != self {
            return Err(ClaimTreeError::format(
                "values",
                format!("value for {} is not in canonical form", self.account),
            ));
        }
        Ok(())
    }
}

impl From<NormalizedValue> for EntitlementRecord {
    fn from(value: NormalizedValue) -> Self {
        EntitlementRecord {
            account: value.account,
            lockup: value.lockup,
            amount: value.amount,
        }
    }
}

fn is_implicit_account(identifier: &str) -> bool {
    identifier.len() == IMPLICIT_ACCOUNT_LENGTH
        && identifier.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Canonicalize an account identifier.
///
/// Named accounts (containing `.`) and 64-hex implicit accounts are only
/// lower-cased. Anything else must be hex (optionally `0x`-prefixed) and is
/// left-padded with zeros to 64 characters.
pub fn normalize_identifier(field: &'static str, raw: &str) -> Result<String> {
    let lower = raw.to_lowercase();
    if lower.is_empty() {
        return Err(ClaimTreeError::format(field, "identifier is empty"));
    }
    if lower.contains('.') || is_implicit_account(&lower) {
        return Ok(lower);
    }

    let digits = lower.strip_prefix("0x").unwrap_or(&lower);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ClaimTreeError::format(
            field,
            format!("{:?} is neither a named account nor a hex identifier", raw),
        ));
    }
    if digits.len() > IMPLICIT_ACCOUNT_LENGTH {
        return Err(ClaimTreeError::format(
            field,
            format!(
                "hex identifier has {} characters, at most {} allowed",
                digits.len(),
                IMPLICIT_ACCOUNT_LENGTH
            ),
        ));
    }
    Ok(format!("{:0>width$}", digits, width = IMPLICIT_ACCOUNT_LENGTH))
}

/// Canonicalize a decimal amount matching `^\d+(\.\d*)?$`.
///
/// The fractional part is discarded, never rounded.
pub fn normalize_amount(raw: &str) -> Result<String> {
    let (integer, fraction) = match raw.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (raw, None),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if integer.is_empty() || !all_digits(integer) || !fraction.is_none_or(all_digits) {
        return Err(ClaimTreeError::format(
            "amount",
            format!("{:?} is not a non-negative decimal number", raw),
        ));
    }

    let value = BigUint::parse_bytes(integer.as_bytes(), 10).ok_or_else(|| {
        ClaimTreeError::format("amount", format!("{:?} is not a decimal integer", raw))
    })?;
    if fraction.is_some_and(|f| f.bytes().any(|b| b != b'0')) {
        debug!(amount = raw, "truncating fractional amount");
    }
    Ok(value.to_str_radix(10))
}

/// Reject record sets in which two records normalize to the same account.
///
/// This is the upload-time check run before a build; the builder itself does
/// not require unique accounts.
pub fn ensure_unique_accounts(records: &[EntitlementRecord]) -> Result<()> {
    let mut seen: HashMap<String, usize> = HashMap::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        let account = normalize_identifier("account", &record.account)
            .map_err(|e| e.at_record(position))?;
        if let Some(&first) = seen.get(&account) {
            return Err(ClaimTreeError::Duplicate {
                account,
                first,
                second: position,
            });
        }
        seen.insert(account, position);
    }
    Ok(())
}
