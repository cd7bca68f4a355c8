//! File-based record store for persistent storage.
//!
//! Layout of a store directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK                  # Advisory lock for single-writer
//! ├─ sync_queue.cbor       # One file per non-empty collection
//! └─ sync_conflicts.cbor
//! ```
//!
//! Every write rewrites the whole collection file using the
//! write-temp, fsync, rename pattern, so a crash leaves either the previous
//! or the new snapshot on disk.

use crate::backend::{upsert, validate_collection, Record, RecordStore};
use crate::error::{StorageError, StorageResult};
use ciborium::Value;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const EXTENSION: &str = "cbor";

/// A directory-backed record store.
///
/// Collections are cached in memory after first access; the cache is only
/// updated after the corresponding file write succeeds.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on its directory. Only one
/// `FileStore` can be open per directory at a time, across processes.
///
/// # Example
///
/// ```no_run
/// use medsync_storage::{FileStore, Record, RecordStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-state")).unwrap();
/// store.replace_all("sync_queue", vec![Record::new("op-1", vec![1])]).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, Vec<Record>>>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns [`StorageError::Locked`])
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.path.join(format!("{collection}.{EXTENSION}"))
    }

    fn read_collection(&self, collection: &str) -> StorageResult<Vec<Record>> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        decode_records(collection, &data)
    }

    /// Runs `f` against a copy of the collection and persists the result.
    fn mutate<F>(&self, collection: &str, f: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Vec<Record>),
    {
        validate_collection(collection)?;
        let mut cache = self.cache.write();

        let mut records = match cache.get(collection) {
            Some(records) => records.clone(),
            None => self.read_collection(collection)?,
        };
        f(&mut records);

        self.write_collection(collection, &records)?;
        cache.insert(collection.to_string(), records);
        Ok(())
    }

    fn write_collection(&self, collection: &str, records: &[Record]) -> StorageResult<()> {
        let path = self.collection_path(collection);

        if records.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
                self.sync_directory()?;
            }
            debug!(collection, "removed empty collection file");
            return Ok(());
        }

        let data = encode_records(records)?;
        let temp_path = path.with_extension(format!("{EXTENSION}.tmp"));

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        self.sync_directory()?;

        debug!(collection, records = records.len(), bytes = data.len(), "wrote collection");
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn get(&self, collection: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .get_all(collection)?
            .into_iter()
            .find(|r| r.key == key)
            .map(|r| r.bytes))
    }

    fn get_all(&self, collection: &str) -> StorageResult<Vec<Record>> {
        validate_collection(collection)?;
        if let Some(records) = self.cache.read().get(collection) {
            return Ok(records.clone());
        }

        let mut cache = self.cache.write();
        if let Some(records) = cache.get(collection) {
            return Ok(records.clone());
        }
        let records = self.read_collection(collection)?;
        cache.insert(collection.to_string(), records.clone());
        Ok(records)
    }

    fn put(&self, collection: &str, record: Record) -> StorageResult<()> {
        self.mutate(collection, |records| upsert(records, record))
    }

    fn put_batch(&self, collection: &str, batch: Vec<Record>) -> StorageResult<()> {
        self.mutate(collection, |records| {
            for record in batch {
                upsert(records, record);
            }
        })
    }

    fn clear(&self, collection: &str) -> StorageResult<()> {
        self.mutate(collection, Vec::clear)
    }

    fn replace_all(&self, collection: &str, replacement: Vec<Record>) -> StorageResult<()> {
        self.mutate(collection, |records| {
            records.clear();
            for record in replacement {
                upsert(records, record);
            }
        })
    }

    fn collections(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn encode_records(records: &[Record]) -> StorageResult<Vec<u8>> {
    let items = records
        .iter()
        .map(|r| {
            Value::Map(vec![
                (Value::Text("key".into()), Value::Text(r.key.clone())),
                (Value::Text("bytes".into()), Value::Bytes(r.bytes.clone())),
            ])
        })
        .collect();

    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Array(items), &mut out)
        .map_err(|e| StorageError::Encoding(e.to_string()))?;
    Ok(out)
}

fn decode_records(collection: &str, data: &[u8]) -> StorageResult<Vec<Record>> {
    let value: Value = ciborium::de::from_reader(data)
        .map_err(|e| StorageError::corrupted(collection, e.to_string()))?;
    let items = value
        .as_array()
        .ok_or_else(|| StorageError::corrupted(collection, "expected array of records"))?;

    items
        .iter()
        .map(|item| {
            let map = item
                .as_map()
                .ok_or_else(|| StorageError::corrupted(collection, "expected record map"))?;
            let field = |name: &str| {
                map.iter()
                    .find(|(k, _)| k.as_text() == Some(name))
                    .map(|(_, v)| v)
            };
            let key = field("key")
                .and_then(Value::as_text)
                .ok_or_else(|| StorageError::corrupted(collection, "missing key"))?;
            let bytes = field("bytes")
                .and_then(Value::as_bytes)
                .ok_or_else(|| StorageError::corrupted(collection, "missing bytes"))?;
            Ok(Record::new(key, bytes.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");

        let store = FileStore::open(&path).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert!(store.get_all("sync_queue").unwrap().is_empty());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .replace_all(
                    "sync_queue",
                    vec![Record::new("b", vec![2]), Record::new("a", vec![1])],
                )
                .unwrap();
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            let records = store.get_all("sync_queue").unwrap();
            assert_eq!(
                records,
                vec![Record::new("b", vec![2]), Record::new("a", vec![1])]
            );
            assert_eq!(store.get("sync_queue", "a").unwrap(), Some(vec![1]));
        }
    }

    #[test]
    fn file_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let _first = FileStore::open(dir.path()).unwrap();

        let second = FileStore::open(dir.path());
        assert!(matches!(second, Err(StorageError::Locked)));
    }

    #[test]
    fn file_clear_removes_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("sync_meta", Record::new("stats", vec![7])).unwrap();
        assert_eq!(store.collections().unwrap(), vec!["sync_meta".to_string()]);

        store.clear("sync_meta").unwrap();
        assert!(store.collections().unwrap().is_empty());
        assert!(!dir.path().join("sync_meta.cbor").exists());
    }

    #[test]
    fn file_put_batch_appends_and_replaces() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.put("c", Record::new("x", vec![0])).unwrap();
        store
            .put_batch("c", vec![Record::new("y", vec![1]), Record::new("x", vec![2])])
            .unwrap();

        let records = store.get_all("c").unwrap();
        assert_eq!(
            records,
            vec![Record::new("x", vec![2]), Record::new("y", vec![1])]
        );
    }

    #[test]
    fn file_corrupted_collection() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sync_queue.cbor"), b"\xff\x00garbage").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        let result = store.get_all("sync_queue");
        assert!(matches!(result, Err(StorageError::Corrupted { .. })));
    }

    #[test]
    fn file_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let result = store.put("../escape", Record::new("a", vec![]));
        assert!(matches!(result, Err(StorageError::InvalidCollection(_))));
    }
}
