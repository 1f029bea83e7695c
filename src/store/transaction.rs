//! The backend-agnostic write transaction.
//!
//! A `WriteTransaction` is plain data: five operation groups keyed by the
//! target record key. Backends apply it all-or-nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::error::{Precondition, StoreError, StoreResult, TxGroup};

/// An atomic batch of mutations.
///
/// ```
/// use kvdb::store::WriteTransaction;
///
/// let tx = WriteTransaction::new()
///     .create("user/1", &serde_json::json!({"name": "Alice"}))?
///     .create_list("user/1/posts")
///     .append("feed", ["user/1"]);
/// assert_eq!(tx.keys().len(), 3);
/// # Ok::<(), kvdb::store::StoreError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteTransaction {
    /// JSON records that must not already exist.
    pub creates: BTreeMap<String, Value>,

    /// JSON records replaced (or created) unconditionally.
    pub overwrites: BTreeMap<String, Value>,

    /// Top-level fields merged into existing JSON records.
    pub set_fields: BTreeMap<String, Map<String, Value>>,

    /// Strings appended to existing string lists.
    pub str_list_appends: BTreeMap<String, Vec<String>>,

    /// Empty string lists that must not already exist.
    pub str_list_creates: Vec<String>,
}

impl WriteTransaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a create of a JSON record.
    pub fn create<T: Serialize + ?Sized>(mut self, key: impl Into<String>, value: &T) -> StoreResult<Self> {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.creates.insert(key, value);
        Ok(self)
    }

    /// Add an unconditional overwrite of a JSON record.
    pub fn overwrite<T: Serialize + ?Sized>(mut self, key: impl Into<String>, value: &T) -> StoreResult<Self> {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.overwrites.insert(key, value);
        Ok(self)
    }

    /// Set a single top-level field on an existing JSON record.
    pub fn set_field<T: Serialize + ?Sized>(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: &T,
    ) -> StoreResult<Self> {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.set_fields.entry(key).or_default().insert(field.into(), value);
        Ok(self)
    }

    /// Merge several fields into an existing JSON record.
    pub fn set_fields(mut self, key: impl Into<String>, fields: Map<String, Value>) -> Self {
        self.set_fields.entry(key.into()).or_default().extend(fields);
        self
    }

    /// Append strings to an existing string list.
    pub fn append<I, S>(mut self, key: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.str_list_appends
            .entry(key.into())
            .or_default()
            .extend(items.into_iter().map(Into::into));
        self
    }

    /// Create an empty string list.
    pub fn create_list(mut self, key: impl Into<String>) -> Self {
        self.str_list_creates.push(key.into());
        self
    }

    /// Check if the transaction does nothing.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.overwrites.is_empty()
            && self.set_fields.is_empty()
            && self.str_list_appends.is_empty()
            && self.str_list_creates.is_empty()
    }

    /// Every key touched by any group, deduplicated and sorted.
    ///
    /// The sorted order is the lock acquisition order.
    pub fn keys(&self) -> BTreeSet<&str> {
        self.entries().into_iter().map(|(_, key)| key).collect()
    }

    /// All `(group, key)` pairs in application order.
    ///
    /// Repeated `str_list_creates` entries appear once.
    pub fn entries(&self) -> Vec<(TxGroup, &str)> {
        let mut entries = Vec::new();
        entries.extend(self.creates.keys().map(|k| (TxGroup::Creates, k.as_str())));
        entries.extend(self.overwrites.keys().map(|k| (TxGroup::Overwrites, k.as_str())));
        entries.extend(self.set_fields.keys().map(|k| (TxGroup::SetFields, k.as_str())));
        entries.extend(self.list_creates().into_iter().map(|k| (TxGroup::StrListCreates, k)));
        entries.extend(
            self.str_list_appends
                .keys()
                .map(|k| (TxGroup::StrListAppends, k.as_str())),
        );
        entries
    }

    /// The deduplicated list-create keys, sorted.
    pub fn list_creates(&self) -> BTreeSet<&str> {
        self.str_list_creates.iter().map(String::as_str).collect()
    }

    /// Check the shape rules shared by every backend.
    ///
    /// A key may be the target of at most one operation group.
    pub fn validate(&self) -> StoreResult<()> {
        let mut seen: HashMap<&str, TxGroup> = HashMap::new();
        for (group, key) in self.entries() {
            if seen.insert(key, group).is_some() {
                return Err(StoreError::precondition(key, group, Precondition::DuplicateKey));
            }
        }
        Ok(())
    }
}

fn to_value<T: Serialize + ?Sized>(key: &str, value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::decode(key, e))
}
