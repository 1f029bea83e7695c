//! Blob operations for item storage.
//!
//! Each item is stored as a separate JSON file holding its typed attribute
//! map, e.g.
//!
//! ```text
//! {
//!   "key": { "S": "user/1" },
//!   "rawJson": { "M": { "name": { "S": "Alice" } } }
//! }
//! ```
//!
//! Attribute maps are ordered, so equal items always produce the same blob.

use git2::Repository;

use crate::durable::{AttributeValue, Item, KEY_ATTR};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, ItemKey};

/// serialize an item to JSON bytes
pub fn serialize_item(item: &Item) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(item)?)
}

/// deserialize an item from JSON bytes
///
/// validates that the key stored in the item matches the file it came from
pub fn deserialize_item(bytes: &[u8], expected_key: &ItemKey) -> StorageResult<Item> {
    let item: Item = serde_json::from_slice(bytes)?;

    let stored = item.get(KEY_ATTR).and_then(AttributeValue::as_s);
    if stored != Some(expected_key.as_str()) {
        return Err(StorageError::CorruptedData {
            path: expected_key.file_name().into(),
            reason: format!(
                "key mismatch: file name suggests '{}' but content has {:?}",
                expected_key, stored
            ),
        });
    }

    Ok(item)
}

/// write an item as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content)
pub fn write_blob(repo: &Repository, item: &Item) -> StorageResult<BlobId> {
    let bytes = serialize_item(item)?;
    let oid = repo.blob(&bytes)?;
    Ok(BlobId::new(oid))
}

/// read a blob's content from the repository
pub fn read_blob(repo: &Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
