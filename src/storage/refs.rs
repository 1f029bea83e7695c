//! Branch and reference management.
//!
//! Git refs are pointers to commits. All committed data lives on `main`;
//! HEAD always points to it.

use git2::{ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

/// Manages Git references (branches).
pub struct RefManager;

impl RefManager {
    /// Resolve a branch name to its current commit ID.
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Get the current HEAD commit (the main branch).
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let head = repo.head().map_err(|e| {
            if e.code() == ErrorCode::UnbornBranch {
                StorageError::EmptyRepository
            } else {
                StorageError::Git(e)
            }
        })?;

        let commit = head.peel_to_commit()?;
        Ok(CommitId::new(commit.id()))
    }

    /// Check if a branch exists.
    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }

        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;

        Ok(())
    }

    /// Update a branch only if it still points to the expected commit.
    ///
    /// Compare-and-swap: fails with `ConcurrentModification` when the branch
    /// moved since `expected` was read.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::resolve_branch(repo, branch)?;
        if current != expected {
            return Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            });
        }

        let log_message = format!("update branch to {}", new_target.short());
        repo.reference_matching(
            &branch.as_ref_path(),
            new_target.raw(),
            true,
            expected.raw(),
            &log_message,
        )
        .map_err(|e| match e.code() {
            ErrorCode::Modified => StorageError::ConcurrentModification {
                branch: branch.to_string(),
            },
            _ => StorageError::Git(e),
        })?;

        Ok(())
    }

    /// Initialize the main branch if it doesn't exist and point HEAD at it.
    ///
    /// This should be called after creating the initial commit.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();

        if !Self::branch_exists(repo, &main) {
            Self::create_branch(repo, &main, initial_commit)?;
        }

        repo.set_head(&main.as_ref_path())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::create_initial_tree;
    use tempfile::TempDir;

    fn setup_repo_with_commit() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let commit_id = {
            let tree_id = create_initial_tree(&repo).unwrap();
            let tree = repo.find_tree(tree_id.raw()).unwrap();
            let sig = git2::Signature::now("Test", "test@test.com").unwrap();

            let commit_oid = repo
                .commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
                .unwrap();

            CommitId::new(commit_oid)
        };

        RefManager::init_main_branch(&repo, commit_id).unwrap();

        (dir, repo, commit_id)
    }

    fn second_commit(repo: &Repository, parent: CommitId) -> CommitId {
        let tree_id = create_initial_tree(repo).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.find_commit(parent.raw()).unwrap();
        let oid = repo
            .commit(None, &sig, &sig, "Second commit", &tree, &[&parent])
            .unwrap();
        CommitId::new(oid)
    }

    #[test]
    fn test_head_commit() {
        let (_dir, repo, expected) = setup_repo_with_commit();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), expected);
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::main()).unwrap(), expected);
    }

    #[test]
    fn test_duplicate_branch_error() {
        let (_dir, repo, base_commit) = setup_repo_with_commit();
        let result = RefManager::create_branch(&repo, &BranchName::main(), base_commit);
        assert!(matches!(result, Err(StorageError::BranchAlreadyExists(_))));
    }

    #[test]
    fn test_update_branch_if_unchanged() {
        let (_dir, repo, commit1) = setup_repo_with_commit();
        let main = BranchName::main();
        let commit2 = second_commit(&repo, commit1);

        RefManager::update_branch_if_unchanged(&repo, &main, commit1, commit2).unwrap();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), commit2);

        // stale expectation
        let result = RefManager::update_branch_if_unchanged(&repo, &main, commit1, commit2);
        assert!(matches!(result, Err(StorageError::ConcurrentModification { .. })));
    }
}
