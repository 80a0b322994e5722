use thiserror::Error;

/// Alias for `core::result::Result<T, ClaimTreeError>`.
pub type Result<T> = core::result::Result<T, ClaimTreeError>;

/// Errors from claim tree operations.
///
/// `record` is the 0-based position of the offending entitlement record in
/// the build input, when one is known.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimTreeError {
    /// Malformed identifier, amount, digest or stored tree header.
    #[error("invalid {field}{}: {reason}", at(.record))]
    Format {
        /// Name of the offending field, as it appears in records and dumps.
        field: &'static str,
        /// Position of the offending record, when known.
        record: Option<usize>,
        /// What is wrong with the field.
        reason: String,
    },
    /// A normalized value cannot be serialized into the leaf layout.
    #[error("cannot encode {field}{}: {reason}", at(.record))]
    Encoding {
        /// Name of the field that could not be encoded.
        field: &'static str,
        /// Position of the offending record, when known.
        record: Option<usize>,
        /// Why encoding failed.
        reason: String,
    },
    /// Proof requested for a position outside the node array or value list.
    #[error("index {index} is out of range (length {len})")]
    Index {
        /// Requested index.
        index: usize,
        /// Length of the array indexed into.
        len: usize,
    },
    /// Two records normalize to the same account.
    #[error("duplicate account {account} at records {first} and {second}")]
    Duplicate {
        /// The account after normalization.
        account: String,
        /// Position of the first record with this account.
        first: usize,
        /// Position of the later record with this account.
        second: usize,
    },
    /// Failure reported by a blob store backend.
    #[error("store error: {0}")]
    Store(String),
}

fn at(record: &Option<usize>) -> String {
    match record {
        Some(position) => format!(" at record {}", position),
        None => String::new(),
    }
}

impl ClaimTreeError {
    pub(crate) fn format(field: &'static str, reason: impl Into<String>) -> Self {
        ClaimTreeError::Format {
            field,
            record: None,
            reason: reason.into(),
        }
    }

    pub(crate) fn encoding(field: &'static str, reason: impl Into<String>) -> Self {
        ClaimTreeError::Encoding {
            field,
            record: None,
            reason: reason.into(),
        }
    }

    /// Attach the position of the offending record to a format or encoding
    /// error. Other variants are returned unchanged.
    pub fn at_record(self, position: usize) -> Self {
        match self {
            ClaimTreeError::Format { field, reason, .. } => ClaimTreeError::Format {
                field,
                record: Some(position),
                reason,
            },
            ClaimTreeError::Encoding { field, reason, .. } => ClaimTreeError::Encoding {
                field,
                record: Some(position),
                reason,
            },
            other => other,
        }
    }

    /// The offending field name, for format and encoding errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ClaimTreeError::Format { field, .. } | ClaimTreeError::Encoding { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }

    /// The offending record position, when known.
    pub fn record(&self) -> Option<usize> {
        match self {
            ClaimTreeError::Format { record, .. } | ClaimTreeError::Encoding { record, .. } => {
                *record
            }
            ClaimTreeError::Duplicate { second, .. } => Some(*second),
            _ => None,
        }
    }
}
