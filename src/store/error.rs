//! Store error types.
//!
//! Every store operation fails with exactly one of these. Transactions are
//! all-or-nothing, so an error never comes with partial effects.

use std::fmt;

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A read targeted a key absent from the relevant table.
    #[error("no such key: {key}")]
    NotFound { key: String },

    /// A transaction precondition was violated; nothing was written.
    #[error("transaction precondition failed: {group} on key '{key}': {reason}")]
    PreconditionFailed {
        key: String,
        group: TxGroup,
        reason: Precondition,
    },

    /// A stored or supplied value has the wrong shape.
    #[error("decode error{}: {reason}", key_suffix(.key))]
    Decode { key: Option<String>, reason: String },

    /// The backend failed (I/O, provider, lock timeout, unexpected native shape).
    #[error("backend error: {0}")]
    Backend(String),
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(k) => format!(" for key '{}'", k),
        None => String::new(),
    }
}

impl StoreError {
    /// Create a not-found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a precondition failure.
    pub fn precondition(key: impl Into<String>, group: TxGroup, reason: Precondition) -> Self {
        Self::PreconditionFailed {
            key: key.into(),
            group,
            reason,
        }
    }

    /// Create a decode error attached to a key.
    pub fn decode(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Decode {
            key: Some(key.into()),
            reason: reason.to_string(),
        }
    }

    /// Create a backend error with some context.
    pub fn backend(context: &str, err: impl fmt::Display) -> Self {
        Self::Backend(format!("{}: {}", context, err))
    }

    /// Check if this error means the key doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Check if the caller may re-read, recompute and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode {
            key: None,
            reason: err.to_string(),
        }
    }
}

/// The operation group of a [`WriteTransaction`](super::WriteTransaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxGroup {
    Creates,
    Overwrites,
    SetFields,
    StrListAppends,
    StrListCreates,
}

impl TxGroup {
    /// Whether this group writes JSON records (as opposed to string lists).
    pub fn is_json(&self) -> bool {
        matches!(self, TxGroup::Creates | TxGroup::Overwrites | TxGroup::SetFields)
    }
}

impl fmt::Display for TxGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxGroup::Creates => "creates",
            TxGroup::Overwrites => "overwrites",
            TxGroup::SetFields => "set_fields",
            TxGroup::StrListAppends => "str_list_appends",
            TxGroup::StrListCreates => "str_list_creates",
        };
        f.write_str(name)
    }
}

/// Which precondition was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The key had to be absent.
    MustNotExist,
    /// The key had to exist.
    MustExist,
    /// The key already holds the other record kind.
    KindConflict,
    /// The key appears in more than one operation group.
    DuplicateKey,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::MustNotExist => write!(f, "expected key not to exist, but it does"),
            Precondition::MustExist => write!(f, "expected key to exist, but it does not"),
            Precondition::KindConflict => {
                write!(f, "key already holds a record of the other kind")
            }
            Precondition::DuplicateKey => {
                write!(f, "key appears in more than one operation group")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = StoreError::not_found("k");
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        let failed = StoreError::precondition("k", TxGroup::Creates, Precondition::MustNotExist);
        assert!(failed.is_retryable());
        assert!(!failed.is_not_found());

        assert!(!StoreError::Backend("boom".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let failed =
            StoreError::precondition("l", TxGroup::StrListAppends, Precondition::MustExist);
        let msg = failed.to_string();
        assert!(msg.contains("str_list_appends"));
        assert!(msg.contains("'l'"));

        let decode = StoreError::decode("k", "not a map");
        assert_eq!(decode.to_string(), "decode error for key 'k': not a map");

        let anonymous: StoreError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(anonymous.to_string().starts_with("decode error: "));
    }
}
