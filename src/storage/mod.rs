//! storage layer: a Git-backed durable provider
//!
//! Items are JSON blobs in a Git tree and every committed write request is
//! one commit on `main`. The durable store talks to this layer only through
//! [`GitProvider`], its `TransactProvider` implementation; nothing above it
//! touches git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GitProvider                            │
//! │   (conditions, update expressions, idempotency tokens)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │        (thread-safe reads, one-commit item writes)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │  (tables)   │       │  (items)    │       │   (main)    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use kvdb::durable::{DurableConfig, DurableStore};
//! use kvdb::storage::GitProvider;
//! use kvdb::store::{KeyValueStore, WriteTransaction};
//!
//! let provider = GitProvider::open_or_init("./my_database")?;
//! let store = DurableStore::new(provider, DurableConfig::new("records"));
//!
//! let tx = WriteTransaction::new().create_list("feed");
//! store.execute_transaction(&tx)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod blob;
mod commit;
mod error;
mod provider;
mod refs;
mod repository;
mod tree;
mod types;

pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use provider::{GitProvider, TOKEN_WINDOW_MINUTES};
pub use repository::GitRepository;
pub use types::{
    BlobId, BranchName, CommitId, GitSignature, InvalidNameError, ItemKey, ItemPath, TableName,
    TreeId,
};
