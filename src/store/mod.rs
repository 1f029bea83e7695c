//! The key-value store capability set.
//!
//! Both backends implement [`KeyValueStore`]; callers depend only on the
//! trait. The one operation with real weight is
//! [`execute_transaction`](KeyValueStore::execute_transaction): an atomic,
//! multi-key write over JSON records and string-list records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      KeyValueStore                          │
//! │   (has_key, get_json, get_jsons, get_string_list, decode,   │
//! │                  execute_transaction)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!       ┌──────────────────┐          ┌──────────────────────┐
//!       │   MemoryStore    │          │  DurableStore<P>     │
//!       │ (per-key locks)  │          │ (conditional commit) │
//!       └──────────────────┘          └──────────────────────┘
//!                                                │
//!                                                ▼
//!                                     ┌──────────────────────┐
//!                                     │  TransactProvider    │
//!                                     │  (e.g. GitProvider)  │
//!                                     └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use kvdb::memory::MemoryStore;
//! use kvdb::store::{KeyValueStore, KeyValueStoreExt, WriteTransaction};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let tx = WriteTransaction::new().create("k", &json!({"a": 1}))?;
//! store.execute_transaction(&tx)?;
//!
//! let tx = WriteTransaction::new().set_field("k", "b", &2)?;
//! store.execute_transaction(&tx)?;
//!
//! let value: serde_json::Value = store.get_json("k")?;
//! assert_eq!(value, json!({"a": 1, "b": 2}));
//! # Ok::<(), kvdb::store::StoreError>(())
//! ```

mod error;
mod record;
mod token;
mod transaction;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use error::{Precondition, StoreError, StoreResult, TxGroup};
pub use record::RawRecord;
pub use token::RequestToken;
pub use transaction::WriteTransaction;

/// Operations shared by every backend.
///
/// Implementations must be safe to call from many threads at once.
pub trait KeyValueStore: Send + Sync {
    /// Check whether the key holds a record of either kind.
    fn has_key(&self, key: &str) -> StoreResult<bool>;

    /// Read a JSON record.
    ///
    /// Fails with `NotFound` when no JSON record exists under the key.
    fn get_json_value(&self, key: &str) -> StoreResult<Value>;

    /// Read several JSON records at once.
    ///
    /// Missing keys are simply absent from the result.
    fn get_jsons(&self, keys: &[String]) -> StoreResult<Vec<RawRecord>>;

    /// Read a string-list record.
    fn get_string_list(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Apply a transaction atomically.
    ///
    /// Either every mutation becomes visible or none does.
    fn execute_transaction(&self, tx: &WriteTransaction) -> StoreResult<()>;

    /// Extract the JSON payload from a record returned by [`get_jsons`](Self::get_jsons).
    fn decode_value(&self, raw: &RawRecord) -> StoreResult<Value>;

    /// Short backend name for logs and the CLI.
    fn backend_name(&self) -> &'static str;
}

/// Typed helpers layered over [`KeyValueStore`].
pub trait KeyValueStoreExt: KeyValueStore {
    /// Read a JSON record into `T`.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<T> {
        let value = self.get_json_value(key)?;
        serde_json::from_value(value).map_err(|e| StoreError::decode(key, e))
    }

    /// Decode a raw record into `T`.
    fn decode<T: DeserializeOwned>(&self, raw: &RawRecord) -> StoreResult<T> {
        let value = self.decode_value(raw)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Overwrite a single JSON record.
    fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let tx = WriteTransaction::new().overwrite(key, value)?;
        self.execute_transaction(&tx)
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
