//! In-memory record store for testing.

use crate::backend::{upsert, validate_collection, Record, RecordStore};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory record store.
///
/// This store keeps all collections in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that don't need persistence
///
/// Write failures can be injected with [`InMemoryStore::fail_writes`] to
/// exercise the sync core's persistence error paths.
///
/// # Example
///
/// ```rust
/// use medsync_storage::{InMemoryStore, Record, RecordStore};
///
/// let store = InMemoryStore::new();
/// store
///     .put_batch("sync_conflicts", vec![Record::new("a", vec![1]), Record::new("b", vec![2])])
///     .unwrap();
/// assert_eq!(store.get_all("sync_conflicts").unwrap().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<Record>>>,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StorageError::Injected`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of successful writes so far.
    ///
    /// Useful for asserting write amplification in tests.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_write(&self, collection: &str) -> StorageResult<()> {
        validate_collection(collection)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Injected(collection.to_string()));
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordStore for InMemoryStore {
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|records| records.iter().find(|r| r.key == key))
            .map(|r| r.bytes.clone()))
    }

    fn get_all(&self, collection: &str) -> StorageResult<Vec<Record>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    fn put(&self, collection: &str, record: Record) -> StorageResult<()> {
        self.check_write(collection)?;
        let mut collections = self.collections.write();
        upsert(collections.entry(collection.to_string()).or_default(), record);
        self.record_write();
        Ok(())
    }

    fn put_batch(&self, collection: &str, records: Vec<Record>) -> StorageResult<()> {
        self.check_write(collection)?;
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        for record in records {
            upsert(target, record);
        }
        self.record_write();
        Ok(())
    }

    fn clear(&self, collection: &str) -> StorageResult<()> {
        self.check_write(collection)?;
        self.collections.write().remove(collection);
        self.record_write();
        Ok(())
    }

    fn replace_all(&self, collection: &str, records: Vec<Record>) -> StorageResult<()> {
        self.check_write(collection)?;
        let mut collections = self.collections.write();
        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            upsert(&mut fresh, record);
        }
        if fresh.is_empty() {
            collections.remove(collection);
        } else {
            collections.insert(collection.to_string(), fresh);
        }
        self.record_write();
        Ok(())
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
