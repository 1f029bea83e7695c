//! In-memory backend.
//!
//! Holds two logical tables (JSON records and string-list records) and a
//! per-key lock registry. There is no transactional engine underneath, so a
//! transaction reproduces atomicity and isolation with local locks:
//!
//! 1. collect the sorted, deduplicated key set
//! 2. lock every key in that order
//! 3. validate every precondition and build every new value
//! 4. apply the prepared writes (this step cannot fail)
//! 5. release the locks (on every exit path, via drop)
//!
//! Readers take the same per-key lock, so a read never observes a
//! half-applied transaction on that key.

mod locks;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::store::{
    KeyValueStore, Precondition, RawRecord, StoreError, StoreResult, TxGroup, WriteTransaction,
};

pub use locks::{KeyLockRegistry, KeyLockSet, LockTimeout};

/// In-memory backend configuration.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    /// Give up acquiring key locks after this long. `None` waits forever.
    pub lock_timeout: Option<Duration>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lock acquisition timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// The in-memory store.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// key -> serialized JSON
    jsons: RwLock<HashMap<String, Vec<u8>>>,
    /// key -> string list
    lists: RwLock<HashMap<String, Vec<String>>>,
    locks: KeyLockRegistry,
    config: MemoryConfig,
}

/// Writes computed while the keys are locked, applied afterwards.
#[derive(Default)]
struct PreparedWrites<'tx> {
    jsons: Vec<(&'tx str, Vec<u8>)>,
    lists: Vec<(&'tx str, Vec<String>)>,
}

impl MemoryStore {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with a custom configuration.
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(MemoryStoreInner {
                config,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.inner.config
    }

    /// Number of distinct keys holding a record of either kind.
    pub fn len(&self) -> usize {
        let jsons = self.inner.jsons.read();
        let lists = self.inner.lists.read();
        jsons.len() + lists.keys().filter(|k| !jsons.contains_key(*k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys that have ever been locked.
    pub fn lock_count(&self) -> usize {
        self.inner.locks.len()
    }

    fn lock_keys<'a, I>(&self, keys: I) -> StoreResult<KeyLockSet>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.inner
            .locks
            .acquire(keys, self.inner.config.lock_timeout)
            .map_err(|e| {
                warn!(target: "kvdb::memory", key = %e.key, waited = ?e.waited, "Lock acquisition timed out");
                StoreError::backend("lock acquisition", e)
            })
    }

    fn lock_key(&self, key: &str) -> StoreResult<KeyLockSet> {
        self.lock_keys(std::iter::once(key))
    }

    /// Validate every precondition and compute every new value.
    ///
    /// Must be called with all of the transaction's keys locked. Nothing is
    /// written here, so any error leaves the store untouched.
    fn prepare<'tx>(&self, tx: &'tx WriteTransaction) -> StoreResult<PreparedWrites<'tx>> {
        let jsons = self.inner.jsons.read();
        let lists = self.inner.lists.read();
        let mut writes = PreparedWrites::default();

        for (key, value) in &tx.creates {
            if jsons.contains_key(key) {
                return Err(StoreError::precondition(key, TxGroup::Creates, Precondition::MustNotExist));
            }
            if lists.contains_key(key) {
                return Err(StoreError::precondition(key, TxGroup::Creates, Precondition::KindConflict));
            }
            writes.jsons.push((key.as_str(), encode(key, value)?));
        }

        for (key, value) in &tx.overwrites {
            if lists.contains_key(key) {
                return Err(StoreError::precondition(key, TxGroup::Overwrites, Precondition::KindConflict));
            }
            writes.jsons.push((key.as_str(), encode(key, value)?));
        }

        for (key, fields) in &tx.set_fields {
            let current = jsons
                .get(key)
                .ok_or_else(|| StoreError::precondition(key, TxGroup::SetFields, Precondition::MustExist))?;
            if fields.is_empty() {
                // existence check only; the record is left as it is
                continue;
            }
            let mut map = decode_object(key, current)?;
            for (field, value) in fields {
                map.insert(field.clone(), value.clone());
            }
            writes.jsons.push((key.as_str(), encode(key, &Value::Object(map))?));
        }

        for key in tx.list_creates() {
            if lists.contains_key(key) {
                return Err(StoreError::precondition(key, TxGroup::StrListCreates, Precondition::MustNotExist));
            }
            if jsons.contains_key(key) {
                return Err(StoreError::precondition(key, TxGroup::StrListCreates, Precondition::KindConflict));
            }
            writes.lists.push((key, Vec::new()));
        }

        for (key, items) in &tx.str_list_appends {
            // append to the snapshot taken under the lock
            let mut list = lists
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::precondition(key, TxGroup::StrListAppends, Precondition::MustExist))?;
            list.extend(items.iter().cloned());
            writes.lists.push((key.as_str(), list));
        }

        Ok(writes)
    }

    fn apply(&self, writes: PreparedWrites<'_>) {
        if !writes.jsons.is_empty() {
            let mut jsons = self.inner.jsons.write();
            for (key, bytes) in writes.jsons {
                jsons.insert(key.to_string(), bytes);
            }
        }
        if !writes.lists.is_empty() {
            let mut lists = self.inner.lists.write();
            for (key, list) in writes.lists {
                lists.insert(key.to_string(), list);
            }
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn has_key(&self, key: &str) -> StoreResult<bool> {
        let _lock = self.lock_key(key)?;
        let exists = self.inner.jsons.read().contains_key(key) || self.inner.lists.read().contains_key(key);
        Ok(exists)
    }

    fn get_json_value(&self, key: &str) -> StoreResult<Value> {
        let _lock = self.lock_key(key)?;
        let jsons = self.inner.jsons.read();
        let bytes = jsons.get(key).ok_or_else(|| StoreError::not_found(key))?;
        serde_json::from_slice(bytes).map_err(|e| StoreError::decode(key, e))
    }

    fn get_jsons(&self, keys: &[String]) -> StoreResult<Vec<RawRecord>> {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(keys.len());
        for key in keys.iter().filter(|k| seen.insert(k.as_str())) {
            let _lock = self.lock_key(key)?;
            if let Some(bytes) = self.inner.jsons.read().get(key) {
                records.push(RawRecord::Memory {
                    key: key.clone(),
                    json: bytes.clone(),
                });
            }
        }
        Ok(records)
    }

    fn get_string_list(&self, key: &str) -> StoreResult<Vec<String>> {
        let _lock = self.lock_key(key)?;
        self.inner
            .lists
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    fn execute_transaction(&self, tx: &WriteTransaction) -> StoreResult<()> {
        tx.validate()?;
        if tx.is_empty() {
            return Ok(());
        }

        let keys = tx.keys();
        let _locks = self.lock_keys(keys.iter().copied())?;

        let writes = match self.prepare(tx) {
            Ok(writes) => writes,
            Err(e) => {
                warn!(target: "kvdb::memory", error = %e, "Transaction aborted");
                return Err(e);
            }
        };
        let (json_writes, list_writes) = (writes.jsons.len(), writes.lists.len());
        self.apply(writes);

        debug!(
            target: "kvdb::memory",
            keys = keys.len(),
            json_writes,
            list_writes,
            "Transaction committed"
        );
        Ok(())
    }

    fn decode_value(&self, raw: &RawRecord) -> StoreResult<Value> {
        match raw {
            RawRecord::Memory { key, json } => {
                serde_json::from_slice(json).map_err(|e| StoreError::decode(key.as_str(), e))
            }
            other => Err(StoreError::Decode {
                key: None,
                reason: format!("expected an in-memory record, got {}", other.kind()),
            }),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.len())
            .field("locks", &self.lock_count())
            .finish()
    }
}

fn encode(key: &str, value: &Value) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::decode(key, e))
}

fn decode_object(key: &str, bytes: &[u8]) -> StoreResult<Map<String, Value>> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::decode(key, "expected the record to be a JSON object")),
        Err(e) => Err(StoreError::decode(key, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValueStoreExt;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;

    fn create(key: &str, value: Value) -> WriteTransaction {
        WriteTransaction::new().create(key, &value).unwrap()
    }

    #[test]
    fn test_create_once() {
        let store = MemoryStore::new();
        store.execute_transaction(&create("k", json!({"v": 1}))).unwrap();

        let second = store.execute_transaction(&create("k", json!({"v": 2})));
        assert!(matches!(
            second,
            Err(StoreError::PreconditionFailed {
                group: TxGroup::Creates,
                reason: Precondition::MustNotExist,
                ..
            })
        ));
        assert_eq!(store.get_json_value("k").unwrap(), json!({"v": 1}));
    }

    #[test]
    fn test_set_fields_merge() {
        let store = MemoryStore::new();
        store.execute_transaction(&create("k", json!({"a": 1}))).unwrap();

        let tx = WriteTransaction::new().set_field("k", "b", &2).unwrap();
        store.execute_transaction(&tx).unwrap();

        assert_eq!(store.get_json_value("k").unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_set_fields_on_non_object_fails() {
        let store = MemoryStore::new();
        store.execute_transaction(&create("k", json!([1, 2]))).unwrap();

        let tx = WriteTransaction::new().set_field("k", "b", &2).unwrap();
        assert!(matches!(store.execute_transaction(&tx), Err(StoreError::Decode { .. })));
        assert_eq!(store.get_json_value("k").unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_list_append_accumulates() {
        let store = MemoryStore::new();
        store.execute_transaction(&WriteTransaction::new().create_list("l")).unwrap();
        store.execute_transaction(&WriteTransaction::new().append("l", ["x"])).unwrap();
        store.execute_transaction(&WriteTransaction::new().append("l", ["y"])).unwrap();

        assert_eq!(store.get_string_list("l").unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_append_without_create_fails() {
        let store = MemoryStore::new();
        let result = store.execute_transaction(&WriteTransaction::new().append("m", ["x"]));

        assert!(matches!(
            result,
            Err(StoreError::PreconditionFailed {
                group: TxGroup::StrListAppends,
                reason: Precondition::MustExist,
                ..
            })
        ));
        assert!(!store.has_key("m").unwrap());
        assert!(store.get_string_list("m").unwrap_err().is_not_found());
    }

    #[test]
    fn test_atomicity_on_late_failure() {
        let store = MemoryStore::new();
        store.execute_transaction(&create("existing", json!({"n": 0}))).unwrap();

        // every group but the failing set_fields would succeed
        let tx = WriteTransaction::new()
            .create("fresh", &json!({"n": 1}))
            .unwrap()
            .overwrite("existing", &json!({"n": 2}))
            .unwrap()
            .set_field("missing", "n", &3)
            .unwrap()
            .create_list("list");

        let result = store.execute_transaction(&tx);
        assert!(matches!(
            result,
            Err(StoreError::PreconditionFailed {
                group: TxGroup::SetFields,
                ..
            })
        ));

        assert!(!store.has_key("fresh").unwrap());
        assert!(!store.has_key("list").unwrap());
        assert!(!store.has_key("missing").unwrap());
        assert_eq!(store.get_json_value("existing").unwrap(), json!({"n": 0}));
    }

    #[test]
    fn test_cross_kind_reuse_rejected() {
        let store = MemoryStore::new();
        store.execute_transaction(&create("j", json!({}))).unwrap();
        store.execute_transaction(&WriteTransaction::new().create_list("l")).unwrap();

        let list_over_json = store.execute_transaction(&WriteTransaction::new().create_list("j"));
        assert!(matches!(
            list_over_json,
            Err(StoreError::PreconditionFailed {
                reason: Precondition::KindConflict,
                ..
            })
        ));

        let json_over_list = store.execute_transaction(&WriteTransaction::new().overwrite("l", &1).unwrap());
        assert!(matches!(
            json_over_list,
            Err(StoreError::PreconditionFailed {
                reason: Precondition::KindConflict,
                ..
            })
        ));
    }

    #[test]
    fn test_reads_of_missing_keys() {
        let store = MemoryStore::new();
        assert!(!store.has_key("nope").unwrap());
        assert!(store.get_json_value("nope").unwrap_err().is_not_found());

        store.execute_transaction(&WriteTransaction::new().create_list("l")).unwrap();
        // a list is not a JSON record
        assert!(store.get_json_value("l").unwrap_err().is_not_found());
        assert!(store.has_key("l").unwrap());
    }

    #[test]
    fn test_get_jsons_and_decode() {
        let store = MemoryStore::new();
        store
            .execute_transaction(
                &WriteTransaction::new()
                    .create("a", &json!({"n": 1}))
                    .unwrap()
                    .create("b", &json!({"n": 2}))
                    .unwrap(),
            )
            .unwrap();

        let keys = vec!["a".to_string(), "missing".to_string(), "b".to_string(), "a".to_string()];
        let raws = store.get_jsons(&keys).unwrap();
        // repeated keys come back once
        assert_eq!(raws.len(), 2);

        let values: Vec<Value> = raws.iter().map(|r| store.decode(r).unwrap()).collect();
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2})]);

        let foreign = RawRecord::Attributes(Default::default());
        assert!(matches!(store.decode_value(&foreign), Err(StoreError::Decode { .. })));
    }

    #[test]
    fn test_typed_get_json() {
        #[derive(serde::Deserialize, serde::Serialize, Debug, PartialEq)]
        struct User {
            name: String,
        }

        let store = MemoryStore::new();
        store.set_json("u", &User { name: "Alice".into() }).unwrap();
        let user: User = store.get_json("u").unwrap();
        assert_eq!(user.name, "Alice");

        let wrong: StoreResult<Vec<u32>> = store.get_json("u");
        assert!(matches!(wrong, Err(StoreError::Decode { .. })));
    }

    #[test]
    fn test_empty_transaction_is_noop() {
        let store = MemoryStore::new();
        store.execute_transaction(&WriteTransaction::new()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.lock_count(), 0);
    }

    #[test]
    fn test_disjoint_concurrent_transactions() {
        let store = MemoryStore::new();
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for round in 0..50 {
                        let tx = WriteTransaction::new()
                            .create(format!("t{}/doc{}", i, round), &json!({"round": round}))
                            .unwrap()
                            .create_list(format!("t{}/list{}", i, round));
                        store.execute_transaction(&tx).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), threads * 50 * 2);
    }

    #[test]
    fn test_same_key_concurrent_creates() {
        let store = MemoryStore::new();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let store = store.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    store.execute_transaction(&create("shared", json!({"writer": i})))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::PreconditionFailed { .. }))));
    }

    #[test]
    fn test_overlapping_appends_serialize() {
        let store = MemoryStore::new();
        store.execute_transaction(&WriteTransaction::new().create_list("log")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for n in 0..100 {
                        let tx = WriteTransaction::new()
                            .append("log", [format!("{}-{}", i, n)])
                            .overwrite(format!("last-{}", i), &n)
                            .unwrap();
                        store.execute_transaction(&tx).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get_string_list("log").unwrap().len(), 400);
    }

    #[test]
    fn test_readers_never_see_partial_transaction() {
        let store = MemoryStore::new();
        store
            .execute_transaction(
                &WriteTransaction::new()
                    .create("a", &0)
                    .unwrap()
                    .create("b", &0)
                    .unwrap(),
            )
            .unwrap();

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for n in 1..=200 {
                    let tx = WriteTransaction::new()
                        .overwrite("a", &n)
                        .unwrap()
                        .overwrite("b", &n)
                        .unwrap();
                    store.execute_transaction(&tx).unwrap();
                }
            })
        };

        // a is always written together with b, so b can never lag behind
        // a value of a that was read earlier
        for _ in 0..200 {
            let a: i64 = store.get_json("a").unwrap();
            let b: i64 = store.get_json("b").unwrap();
            assert!(b >= a);
        }
        writer.join().unwrap();
        assert_eq!(store.get_json::<i64>("a").unwrap(), 200);
    }

    #[test]
    fn test_lock_timeout_surfaces_as_backend_error() {
        let store = MemoryStore::with_config(MemoryConfig::new().lock_timeout(Duration::from_millis(20)));
        let _held = store.inner.locks.acquire_one("busy", None).unwrap();

        let other = store.clone();
        let result = thread::spawn(move || other.execute_transaction(&WriteTransaction::new().create_list("busy")))
            .join()
            .unwrap();

        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
