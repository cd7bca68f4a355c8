//! # MedSync Storage
//!
//! Record store trait and implementations for MedSync.
//!
//! The sync core persists its state (operation queue, conflict registry,
//! statistics cache) as flat lists of opaque records grouped into named
//! collections. Stores never interpret record bytes.
//!
//! ## Design Principles
//!
//! - Records are `(key, bytes)` pairs; collections keep insertion order
//! - `replace_all` is atomic with respect to other writers of the same store
//! - Must be `Send + Sync` so the orchestrator can share one store
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - One CBOR file per collection, crash-safe full replace
//!
//! ## Example
//!
//! ```rust
//! use medsync_storage::{InMemoryStore, Record, RecordStore};
//!
//! let store = InMemoryStore::new();
//! store.put("sync_queue", Record::new("op-1", b"hello".to_vec())).unwrap();
//! assert_eq!(store.get("sync_queue", "op-1").unwrap(), Some(b"hello".to_vec()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_collection, Record, RecordStore};
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
