//! Behavioural properties every `KeyValueStore` backend must satisfy.
//!
//! Each test runs against the in-memory store and against the durable store
//! backed by a Git repository in a temporary directory.

use std::sync::{Arc, Barrier};
use std::thread;

use serde_json::{json, Map};
use tempfile::TempDir;

use kvdb::durable::{DurableConfig, DurableStore};
use kvdb::memory::MemoryStore;
use kvdb::storage::GitProvider;
use kvdb::store::{KeyValueStore, Precondition, StoreError, TxGroup, WriteTransaction};

struct Backend {
    store: Arc<dyn KeyValueStore>,
    _dir: Option<TempDir>,
}

fn backends() -> Vec<Backend> {
    let dir = TempDir::new().unwrap();
    let provider = GitProvider::open_or_init(dir.path()).unwrap();
    let durable = DurableStore::new(provider, DurableConfig::new("records"));

    vec![
        Backend {
            store: Arc::new(MemoryStore::new()),
            _dir: None,
        },
        Backend {
            store: Arc::new(durable),
            _dir: Some(dir),
        },
    ]
}

fn precondition_of(err: &StoreError) -> Option<(&str, TxGroup, Precondition)> {
    match err {
        StoreError::PreconditionFailed { key, group, reason } => Some((key.as_str(), *group, *reason)),
        _ => None,
    }
}

#[test]
fn atomicity_on_failed_precondition() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let setup = WriteTransaction::new()
            .create("existing", &json!({"v": 1}))
            .unwrap()
            .create_list("feed");
        store.execute_transaction(&setup).unwrap();

        // the append on "ghost" cannot succeed, so nothing else may land
        let tx = WriteTransaction::new()
            .create("fresh", &json!("new"))
            .unwrap()
            .overwrite("existing", &json!({"v": 2}))
            .unwrap()
            .append("feed", ["x"])
            .append("ghost", ["y"]);
        let err = store.execute_transaction(&tx).unwrap_err();
        assert_eq!(
            precondition_of(&err),
            Some(("ghost", TxGroup::StrListAppends, Precondition::MustExist)),
            "{}",
            store.backend_name()
        );

        assert!(!store.has_key("fresh").unwrap());
        assert_eq!(store.get_json_value("existing").unwrap(), json!({"v": 1}));
        assert!(store.get_string_list("feed").unwrap().is_empty());
        assert!(!store.has_key("ghost").unwrap());
    }
}

#[test]
fn create_once() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let tx = WriteTransaction::new().create("k", &json!({"first": true})).unwrap();
        store.execute_transaction(&tx).unwrap();

        let again = WriteTransaction::new().create("k", &json!({"second": true})).unwrap();
        let err = store.execute_transaction(&again).unwrap_err();
        assert_eq!(
            precondition_of(&err),
            Some(("k", TxGroup::Creates, Precondition::MustNotExist))
        );
        assert!(err.is_retryable());
        assert_eq!(store.get_json_value("k").unwrap(), json!({"first": true}));
    }
}

#[test]
fn set_fields_merge() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let tx = WriteTransaction::new().create("k", &json!({"a": 1})).unwrap();
        store.execute_transaction(&tx).unwrap();

        let tx = WriteTransaction::new().set_field("k", "b", &2).unwrap();
        store.execute_transaction(&tx).unwrap();

        assert_eq!(store.get_json_value("k").unwrap(), json!({"a": 1, "b": 2}));
    }
}

#[test]
fn list_append_accumulation() {
    for backend in backends() {
        let store = backend.store.as_ref();
        store
            .execute_transaction(&WriteTransaction::new().create_list("l"))
            .unwrap();
        store
            .execute_transaction(&WriteTransaction::new().append("l", ["x"]))
            .unwrap();
        store
            .execute_transaction(&WriteTransaction::new().append("l", ["y"]))
            .unwrap();

        assert_eq!(store.get_string_list("l").unwrap(), vec!["x", "y"]);
    }
}

#[test]
fn append_without_create_fails() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let err = store
            .execute_transaction(&WriteTransaction::new().append("m", ["x"]))
            .unwrap_err();

        assert_eq!(
            precondition_of(&err),
            Some(("m", TxGroup::StrListAppends, Precondition::MustExist))
        );
        assert!(!store.has_key("m").unwrap());
        assert!(store.get_string_list("m").unwrap_err().is_not_found());
    }
}

#[test]
fn empty_set_fields_still_requires_the_record() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let err = store
            .execute_transaction(&WriteTransaction::new().set_fields("ghost", Map::new()))
            .unwrap_err();
        assert_eq!(
            precondition_of(&err),
            Some(("ghost", TxGroup::SetFields, Precondition::MustExist)),
            "{}",
            store.backend_name()
        );
        assert!(!store.has_key("ghost").unwrap());

        // on an existing record of any shape it changes nothing
        let tx = WriteTransaction::new().create("plain", &json!("text")).unwrap();
        store.execute_transaction(&tx).unwrap();
        store
            .execute_transaction(&WriteTransaction::new().set_fields("plain", Map::new()))
            .unwrap();
        assert_eq!(store.get_json_value("plain").unwrap(), json!("text"));
    }
}

#[test]
fn cross_kind_reuse_rejected() {
    for backend in backends() {
        let store = backend.store.as_ref();
        store
            .execute_transaction(&WriteTransaction::new().create_list("shared"))
            .unwrap();

        let tx = WriteTransaction::new().overwrite("shared", &json!(1)).unwrap();
        let err = store.execute_transaction(&tx).unwrap_err();
        assert_eq!(
            precondition_of(&err),
            Some(("shared", TxGroup::Overwrites, Precondition::KindConflict))
        );
        assert!(store.get_string_list("shared").unwrap().is_empty());
    }
}

#[test]
fn batch_read_skips_missing_keys() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let tx = WriteTransaction::new()
            .create("a", &json!(1))
            .unwrap()
            .create("b", &json!({"n": 2}))
            .unwrap();
        store.execute_transaction(&tx).unwrap();

        let keys = vec![
            "a".to_string(),
            "missing".to_string(),
            "b".to_string(),
            "a".to_string(),
        ];
        let raws = store.get_jsons(&keys).unwrap();
        assert_eq!(raws.len(), 2, "{}", store.backend_name());

        let mut values: Vec<_> = raws.iter().map(|r| store.decode_value(r).unwrap()).collect();
        values.sort_by_key(|v| v.to_string());
        assert_eq!(values, vec![json!(1), json!({"n": 2})]);
    }
}

#[test]
fn disjoint_key_concurrency() {
    const THREADS: usize = 8;

    for backend in backends() {
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let store = Arc::clone(&backend.store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let tx = WriteTransaction::new()
                        .create(format!("doc-{}", i), &json!({"owner": i}))
                        .unwrap()
                        .create_list(format!("list-{}", i));
                    barrier.wait();
                    store.execute_transaction(&tx)
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        for i in 0..THREADS {
            let store = backend.store.as_ref();
            assert_eq!(store.get_json_value(&format!("doc-{}", i)).unwrap(), json!({"owner": i}));
            assert!(store.get_string_list(&format!("list-{}", i)).unwrap().is_empty());
        }
    }
}

#[test]
fn same_key_concurrency() {
    for backend in backends() {
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let store = Arc::clone(&backend.store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let tx = WriteTransaction::new().create("contested", &json!(i)).unwrap();
                    barrier.wait();
                    store.execute_transaction(&tx)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{}", backend.store.backend_name());

        let loser = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(
            precondition_of(&loser),
            Some(("contested", TxGroup::Creates, Precondition::MustNotExist))
        );
    }
}

#[test]
fn durable_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let provider = GitProvider::open_or_init(dir.path()).unwrap();
        let store = DurableStore::new(provider, DurableConfig::new("records"));
        let tx = WriteTransaction::new()
            .create("k", &json!({"kept": true}))
            .unwrap()
            .create_list("l")
            .append("l", ["never"]);
        // one key in two groups is rejected outright
        assert!(store.execute_transaction(&tx).is_err());

        let tx = WriteTransaction::new().create("k", &json!({"kept": true})).unwrap();
        store.execute_transaction(&tx).unwrap();
    }

    let provider = GitProvider::open_or_init(dir.path()).unwrap();
    let store = DurableStore::new(provider, DurableConfig::new("records"));
    assert_eq!(store.get_json_value("k").unwrap(), json!({"kept": true}));
    assert!(!store.has_key("l").unwrap());
}
