//! kvdb - a transactional key-value store
//!
//! Records are either JSON values or append-only string lists, addressed by
//! key. Writes are batched into a [`store::WriteTransaction`] that is applied
//! atomically: every precondition is checked before anything is written, and
//! either every mutation becomes visible or none does.
//!
//! Two backends implement [`store::KeyValueStore`]:
//!
//! - [`memory::MemoryStore`], a volatile store with per-key locking;
//! - [`durable::DurableStore`], which translates each transaction into one
//!   conditional multi-item write request against a
//!   [`durable::TransactProvider`]. The bundled provider,
//!   [`storage::GitProvider`], commits every request to a Git repository.
//!
//! # Example
//!
//! ```no_run
//! use kvdb::db::Database;
//! use kvdb::store::WriteTransaction;
//! use serde_json::json;
//!
//! let db = Database::open("./my_database")?;
//! let tx = WriteTransaction::new()
//!     .create("user:1", &json!({"name": "Alice"}))?
//!     .create_list("feed");
//! db.execute(&tx)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod db;
pub mod durable;
pub mod memory;
pub mod storage;
pub mod store;
