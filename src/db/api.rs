//! Database API - high-level interface over a key-value store backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use super::config::{Backend, DatabaseConfig};
use crate::durable::{DurableConfig, DurableStore};
use crate::memory::{MemoryConfig, MemoryStore};
use crate::storage::{CommitInfo, GitProvider, GitRepository, StorageError, TableName};
use crate::store::{KeyValueStore, KeyValueStoreExt, StoreError, WriteTransaction};

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The main database handle.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Database {
    config: DatabaseConfig,
    store: Arc<dyn KeyValueStore>,
    /// Present for the Git backend only.
    repo: Option<GitRepository>,
}

impl Database {
    /// Open or create a Git-backed database at the given path.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    /// Create a new in-memory database.
    pub fn in_memory() -> Self {
        let store = MemoryStore::new();
        Self {
            config: DatabaseConfig::memory(),
            store: Arc::new(store),
            repo: None,
        }
    }

    /// Open or create a database with custom configuration.
    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        let (store, repo): (Arc<dyn KeyValueStore>, Option<GitRepository>) = match config.backend {
            Backend::Memory => {
                let mut memory = MemoryConfig::new();
                memory.lock_timeout = config.lock_timeout_duration();
                let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_config(memory));
                (store, None)
            }
            Backend::Git => {
                TableName::new(config.table.as_str()).map_err(StorageError::from)?;

                let repo = if config.create_if_missing {
                    GitRepository::open_or_init(&config.path)?
                } else if config.path.exists() {
                    GitRepository::open(&config.path)?
                } else {
                    return Err(DatabaseError::NotFound(config.path.clone()));
                };

                let provider = GitProvider::new(repo.clone());
                let store: Arc<dyn KeyValueStore> =
                    Arc::new(DurableStore::new(provider, DurableConfig::new(config.table.as_str())));
                (store, Some(repo))
            }
        };

        info!(backend = %config.backend, path = %config.path.display(), "Opened database");
        Ok(Self { config, store, repo })
    }

    /// The underlying store.
    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// A shared handle to the underlying store, for use from other threads.
    pub fn shared_store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    /// Get the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Get the database path (meaningful for the Git backend).
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Check whether a key holds a record.
    pub fn has(&self, key: &str) -> DatabaseResult<bool> {
        Ok(self.store.has_key(key)?)
    }

    /// Read a JSON record.
    pub fn get(&self, key: &str) -> DatabaseResult<Value> {
        Ok(self.store.get_json_value(key)?)
    }

    /// Read a string list.
    pub fn get_list(&self, key: &str) -> DatabaseResult<Vec<String>> {
        Ok(self.store.get_string_list(key)?)
    }

    /// Read several JSON records; missing keys are skipped.
    pub fn get_many(&self, keys: &[String]) -> DatabaseResult<Vec<Value>> {
        let raws = self.store.get_jsons(keys)?;
        let values = raws
            .iter()
            .map(|raw| self.store.decode_value(raw))
            .collect::<Result<_, _>>()?;
        Ok(values)
    }

    /// Overwrite a single JSON record.
    pub fn set(&self, key: &str, value: &Value) -> DatabaseResult<()> {
        Ok(self.store.set_json(key, value)?)
    }

    /// Apply a transaction atomically.
    pub fn execute(&self, tx: &WriteTransaction) -> DatabaseResult<()> {
        Ok(self.store.execute_transaction(tx)?)
    }

    /// Parse a JSON transaction and apply it.
    pub fn execute_json(&self, text: &str) -> DatabaseResult<WriteTransaction> {
        let tx: WriteTransaction =
            serde_json::from_str(text).map_err(|e| DatabaseError::InvalidTransaction(e.to_string()))?;
        self.execute(&tx)?;
        Ok(tx)
    }

    /// Get the commit history, newest first; empty for the memory backend.
    pub fn history(&self, limit: Option<usize>) -> DatabaseResult<Vec<CommitInfo>> {
        match &self.repo {
            Some(repo) => Ok(repo.history(repo.head()?, limit)?),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.store.backend_name())
            .field("path", &self.config.path)
            .finish()
    }
}
