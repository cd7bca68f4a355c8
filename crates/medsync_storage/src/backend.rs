//! Record store trait definition.

use crate::error::{StorageError, StorageResult};

/// A single stored record.
///
/// The store treats `bytes` as opaque. Keys are unique within a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key, unique within its collection.
    pub key: String,
    /// Opaque record bytes.
    pub bytes: Vec<u8>,
}

impl Record {
    /// Creates a new record.
    pub fn new(key: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            bytes,
        }
    }
}

/// A persistent key-value record store used by the sync core.
///
/// Records live in named collections. Collections preserve insertion order,
/// which the operation queue relies on to reload its priority order.
///
/// # Invariants
///
/// - `put` replaces an existing record with the same key in place,
///   otherwise appends
/// - `get_all` returns records in stored order
/// - `replace_all` never interleaves with a concurrent `clear` or
///   `put_batch` on the same collection
/// - Stores must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait RecordStore: Send + Sync {
    /// Returns the bytes stored under `key`, if any.
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Returns every record in `collection`, in stored order.
    ///
    /// A collection that was never written is empty, not an error.
    fn get_all(&self, collection: &str) -> StorageResult<Vec<Record>>;

    /// Stores a single record.
    fn put(&self, collection: &str, record: Record) -> StorageResult<()>;

    /// Stores several records in one write.
    fn put_batch(&self, collection: &str, records: Vec<Record>) -> StorageResult<()>;

    /// Removes every record in `collection`.
    fn clear(&self, collection: &str) -> StorageResult<()>;

    /// Replaces the contents of `collection` with `records` in one write.
    ///
    /// After this returns successfully a reader observes either the old
    /// or the new contents, never a mix.
    fn replace_all(&self, collection: &str, records: Vec<Record>) -> StorageResult<()>;

    /// Lists collections that currently hold at least one record.
    fn collections(&self) -> StorageResult<Vec<String>>;
}

/// Checks that a collection name is usable as a file stem.
///
/// Accepted names are non-empty and consist of ASCII letters, digits,
/// `_` and `-`.
pub fn validate_collection(collection: &str) -> StorageResult<()> {
    let valid = !collection.is_empty()
        && collection
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidCollection(collection.to_string()))
    }
}

/// Inserts `record`, replacing a record with the same key in place.
pub(crate) fn upsert(records: &mut Vec<Record>, record: Record) {
    match records.iter_mut().find(|r| r.key == record.key) {
        Some(existing) => existing.bytes = record.bytes,
        None => records.push(record),
    }
}
