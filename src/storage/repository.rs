//! Core Git repository wrapper.
//!
//! This is the central component of the storage layer. It wraps
//! `git2::Repository` with thread-safe access and provides the item-level
//! operations the provider is built from.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::Repository;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::durable::Item;
use crate::storage::blob;
use crate::storage::commit::{self, CommitBuilder, CommitInfo};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{BranchName, CommitId, GitSignature, ItemKey, TableName};

/// The main Git repository wrapper.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    /// `git2::Repository` is `Send` but not `Sync`, so every access is exclusive.
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        info!(target: "kvdb::storage", path = %path.display(), "Opened repository");

        Ok(Self::wrap(repo, path))
    }

    /// Initialize a new repository.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        let storage = Self::wrap(repo, path);

        storage.with_repo(|repo| {
            let commit_id = commit::create_initial_commit(repo, &storage.inner.signature)?;
            RefManager::init_main_branch(repo, commit_id)?;
            Ok(())
        })?;
        info!(target: "kvdb::storage", path = %path.display(), "Initialized repository");

        Ok(storage)
    }

    /// Open or initialize a repository.
    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn wrap(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: GitSignature::kvdb(),
            }),
        }
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Execute a function with access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// Get the current HEAD commit (tip of main branch).
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    /// Read one item; a missing table or key yields `None`.
    pub fn read_item(&self, table: &TableName, key: &ItemKey, at: CommitId) -> StorageResult<Option<Item>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let blob_id = match tree.get_item_blob_id(repo, table, key)? {
                Some(id) => id,
                None => return Ok(None),
            };

            let bytes = blob::read_blob(repo, blob_id)?;
            blob::deserialize_item(&bytes, key).map(Some)
        })
    }

    /// Read several items from one snapshot; missing keys are skipped.
    pub fn read_items(&self, table: &TableName, keys: &[ItemKey], at: CommitId) -> StorageResult<Vec<Item>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut items = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(blob_id) = tree.get_item_blob_id(repo, table, key)? {
                    let bytes = blob::read_blob(repo, blob_id)?;
                    items.push(blob::deserialize_item(&bytes, key)?);
                }
            }
            Ok(items)
        })
    }

    /// Write every item in one commit on top of `at` and move `main` to it.
    ///
    /// Fails with `ConcurrentModification` if `main` is no longer `at`; in
    /// that case nothing becomes visible.
    pub fn commit_items(
        &self,
        table: &TableName,
        items: &[(ItemKey, Item)],
        at: CommitId,
        message: String,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            for (key, item) in items {
                let blob_id = blob::write_blob(repo, item)?;
                mutator.upsert_item(table, key, blob_id)?;
            }
            let new_tree_id = mutator.write()?;

            let new_commit = CommitBuilder::new(repo)
                .tree(new_tree_id)
                .parent(at)
                .message(message)
                .signature(self.inner.signature.clone())
                .commit()?;

            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), at, new_commit)?;
            debug!(
                target: "kvdb::storage",
                table = %table,
                items = items.len(),
                commit = %new_commit.short(),
                "Committed items"
            );
            Ok(new_commit)
        })
    }

    /// Get commit history, newest first.
    pub fn history(&self, from: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let iter = commit::history(repo, from)?;
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    /// Find a commit made at or after `since` that records `token`.
    pub fn find_token_since(
        &self,
        token: &str,
        from: CommitId,
        since: DateTime<Utc>,
    ) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| {
            for info in commit::history(repo, from)? {
                let info = info?;
                if info.timestamp < since {
                    break;
                }
                if info.request_token() == Some(token) {
                    return Ok(Some(info.id));
                }
            }
            Ok(None)
        })
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .finish()
    }
}
