//! The durable provider contract.
//!
//! A provider accepts a batch of conditional put/update operations with an
//! idempotency token and either commits all of them or none.

use std::fmt;

use thiserror::Error;

use crate::durable::attribute::Item;
use crate::durable::request::TransactWriteRequest;

/// Most operations a single transactional write may carry.
pub const MAX_TRANSACT_ITEMS: usize = 100;
/// Most keys a single batch read may ask for.
pub const MAX_BATCH_GET_KEYS: usize = 100;
/// Longest accepted client request token.
pub const MAX_TOKEN_LEN: usize = 36;

/// Why one operation of a canceled transaction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancellationReason {
    /// This operation was fine; another one failed.
    None,
    /// The operation's condition did not hold.
    ConditionalCheckFailed,
    /// The operation could not be applied to the current item.
    ValidationError(String),
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationReason::None => write!(f, "None"),
            CancellationReason::ConditionalCheckFailed => write!(f, "ConditionalCheckFailed"),
            CancellationReason::ValidationError(msg) => write!(f, "ValidationError({})", msg),
        }
    }
}

/// Errors reported by a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Nothing was written; one reason per requested operation.
    #[error("transaction canceled, reasons: [{}]", reasons_display(.reasons))]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    /// The request itself is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// The provider's own storage failed.
    #[error("storage failure: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

fn reasons_display(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProviderError {
    /// Index and reason of the first operation whose condition failed.
    pub fn failed_condition(&self) -> Option<usize> {
        match self {
            ProviderError::TransactionCanceled { reasons } => reasons
                .iter()
                .position(|r| *r == CancellationReason::ConditionalCheckFailed),
            _ => None,
        }
    }
}

/// A store that natively commits conditional multi-item writes atomically.
pub trait TransactProvider: Send + Sync {
    /// Fetch one item by key.
    fn get_item(&self, table: &str, key: &str) -> Result<Option<Item>, ProviderError>;

    /// Fetch up to [`MAX_BATCH_GET_KEYS`] items; missing keys are skipped.
    fn batch_get_item(&self, table: &str, keys: &[String]) -> Result<Vec<Item>, ProviderError>;

    /// Commit every operation in the request, or none of them.
    fn transact_write_items(&self, request: &TransactWriteRequest) -> Result<(), ProviderError>;
}

impl<P: TransactProvider + ?Sized> TransactProvider for std::sync::Arc<P> {
    fn get_item(&self, table: &str, key: &str) -> Result<Option<Item>, ProviderError> {
        (**self).get_item(table, key)
    }

    fn batch_get_item(&self, table: &str, keys: &[String]) -> Result<Vec<Item>, ProviderError> {
        (**self).batch_get_item(table, keys)
    }

    fn transact_write_items(&self, request: &TransactWriteRequest) -> Result<(), ProviderError> {
        (**self).transact_write_items(request)
    }
}
