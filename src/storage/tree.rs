//! tree operations for table management.
//!
//! in Git, a tree is a directory. Here:
//! - the root tree contains one directory per table
//! - each table directory contains item blobs (`<escaped key>.json`)
//!
//! Tables are never created explicitly: the first item written to a table
//! creates its directory.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, ItemKey, ItemPath, TableName, TreeId};

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// get the tree for a specific table
    pub fn get_table_tree(
        &self,
        repo: &'repo Repository,
        table: &TableName,
    ) -> StorageResult<Option<TreeHandle<'repo>>> {
        match self.tree.get_name(table.as_str()) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: table.as_str().into(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                let tree = repo.find_tree(entry.id())?;
                Ok(Some(TreeHandle::new(tree)))
            }
            None => Ok(None),
        }
    }

    /// get the blob ID for a specific item
    pub fn get_item_blob_id(
        &self,
        repo: &'repo Repository,
        table: &TableName,
        key: &ItemKey,
    ) -> StorageResult<Option<BlobId>> {
        let table_tree = match self.get_table_tree(repo, table)? {
            Some(t) => t,
            None => return Ok(None),
        };

        let result = match table_tree.tree.get_name(&key.file_name()) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Blob) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: ItemPath::new(table, key).to_string().into(),
                        expected: "blob (file)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                Ok(Some(BlobId::new(entry.id())))
            }
            None => Ok(None),
        };
        result
    }
}

/// a mutable tree builder for making changes
///
/// this adds up changes and produces a new tree when its final
/// the original tree is not modified
///
/// # Usage Pattern
///
/// ```ignore
/// let mut mutator = TreeMutator::from_tree(repo, &tree)?;
/// mutator.upsert_item(&table, &key, blob_id)?;
/// let new_tree_id = mutator.write()?;
/// ```
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    /// the root tree we're modifying
    root_builder: Git2TreeBuilder<'repo>,
    /// table -> builder, for tables touched so far
    modified_tables: HashMap<String, Git2TreeBuilder<'repo>>,
    /// original table tree IDs
    original_tables: HashMap<String, Oid>,
}

impl<'repo> TreeMutator<'repo> {
    /// create a new TreeMutator from an existing tree
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let mut original_tables = HashMap::new();
        for entry in tree.inner().iter() {
            if entry.kind() == Some(ObjectType::Tree) {
                if let Some(name) = entry.name() {
                    original_tables.insert(name.to_string(), entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified_tables: HashMap::new(),
            original_tables,
        })
    }

    /// create a new TreeMutator for an empty tree
    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(None)?;
        Ok(Self {
            repo,
            root_builder,
            modified_tables: HashMap::new(),
            original_tables: HashMap::new(),
        })
    }

    /// get or create a builder for a table's subtree
    fn table_builder(&mut self, table: &str) -> StorageResult<&mut Git2TreeBuilder<'repo>> {
        if !self.modified_tables.contains_key(table) {
            let builder = match self.original_tables.get(table) {
                Some(original_id) => {
                    let original_tree = self.repo.find_tree(*original_id)?;
                    self.repo.treebuilder(Some(&original_tree))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.modified_tables.insert(table.to_string(), builder);
        }
        self.modified_tables
            .get_mut(table)
            .ok_or_else(|| StorageError::Internal(format!("no tree builder for table {}", table)))
    }

    /// insert or replace an item, creating its table if needed
    pub fn upsert_item(&mut self, table: &TableName, key: &ItemKey, blob_id: BlobId) -> StorageResult<()> {
        let builder = self.table_builder(table.as_str())?;
        builder.insert(key.file_name(), blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (table_name, table_builder) in self.modified_tables {
            let table_tree_id = table_builder.write()?;
            self.root_builder
                .insert(&table_name, table_tree_id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// create the empty root tree of a fresh repository
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}
