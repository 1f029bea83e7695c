//! Storage layer error types
//!
//! All errors that can occur while reading or committing items in the Git
//! repository are defined here.

use std::path::PathBuf;

use thiserror::Error;

use crate::durable::ProviderError;
use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// invalid table name
    #[error("invalid table name: {0}")]
    InvalidTableName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// the specified branch/ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// repo is empty (no commits)
    #[error("repository is empty: no commits found")]
    EmptyRepository,

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the tree entry has an unexpected type
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// branch update failed due to concurrent modification
    #[error("concurrent modification: branch {branch} was updated by another writer")]
    ConcurrentModification { branch: String },

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ProviderError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidTableName(e) => ProviderError::Validation(e.to_string()),
            other => ProviderError::Storage(Box::new(other)),
        }
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_provider_error() {
        let invalid: ProviderError = StorageError::InvalidTableName(InvalidNameError::Empty).into();
        assert!(matches!(invalid, ProviderError::Validation(_)));

        let internal: ProviderError = StorageError::Internal("boom".into()).into();
        assert!(matches!(internal, ProviderError::Storage(_)));
    }
}
