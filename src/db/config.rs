//! Database configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::api::{DatabaseError, DatabaseResult};

/// Which store backs the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Volatile, process-local store.
    Memory,
    /// Durable store committing to a Git repository.
    #[default]
    Git,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Git => write!(f, "git"),
        }
    }
}

/// Database configuration options.
///
/// Can be built in code or loaded from a JSON file:
///
/// ```json
/// { "backend": "git", "path": "./data", "table": "records", "lock_timeout_ms": 500 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend selection.
    pub backend: Backend,
    /// Path to the repository directory (Git backend only).
    pub path: PathBuf,
    /// Table holding every record (Git backend only).
    pub table: String,
    /// Create the repository if it doesn't exist.
    pub create_if_missing: bool,
    /// Per-key lock wait limit in milliseconds (memory backend only).
    pub lock_timeout_ms: Option<u64>,
    /// Enable verbose logging.
    pub verbose: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Git,
            path: PathBuf::from(".kvdb"),
            table: "records".to_string(),
            create_if_missing: true,
            lock_timeout_ms: None,
            verbose: false,
        }
    }
}

impl DatabaseConfig {
    /// Create a new Git-backed configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create an in-memory configuration.
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&text).map_err(|e| {
            DatabaseError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e))
        })
    }

    /// Set the backend.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set the per-key lock wait limit.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Set verbose flag.
    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    /// The per-key lock wait limit, if any.
    pub fn lock_timeout_duration(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::new("/tmp/db")
            .table("docs")
            .lock_timeout(Duration::from_millis(250))
            .verbose(true);

        assert_eq!(config.backend, Backend::Git);
        assert_eq!(config.table, "docs");
        assert_eq!(config.lock_timeout_duration(), Some(Duration::from_millis(250)));
        assert!(config.create_if_missing);
        assert!(config.verbose);

        assert_eq!(DatabaseConfig::memory().backend, Backend::Memory);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"backend": "memory", "lock_timeout_ms": 10}}"#).unwrap();

        let config = DatabaseConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.lock_timeout_duration(), Some(Duration::from_millis(10)));
        // unspecified fields keep their defaults
        assert_eq!(config.table, "records");
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"backend": "tape"}}"#).unwrap();

        let result = DatabaseConfig::from_file(file.path());
        assert!(matches!(result, Err(DatabaseError::InvalidConfig(_))));
    }
}
