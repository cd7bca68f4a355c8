//! Full-replace persistence of engine state.
//!
//! Every mutation rewrites the whole collection through
//! [`RecordStore::replace_all`]. A failed write is retried with backoff;
//! when every attempt fails the in-memory state stays authoritative and a
//! [`SyncEvent::PersistenceFailed`] is emitted.
//!
//! Records this build cannot decode, such as envelopes written by a newer
//! schema version, are held back on load and written again on every save
//! so a downgrade never erases them.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use crate::events::{EventFeed, SyncEvent};
use medsync_protocol::{decode_record, encode_record, Persisted};
use medsync_storage::{Record, RecordStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collection holding the operation queue.
pub const QUEUE_COLLECTION: &str = "sync_queue";

/// Collection holding the conflict registry.
pub const CONFLICTS_COLLECTION: &str = "sync_conflicts";

/// Collection holding the statistics cache.
pub const META_COLLECTION: &str = "sync_meta";

/// Shared handle used by the queue and registry to read and write their
/// collections.
pub(crate) struct Persistence<S: RecordStore> {
    store: Arc<S>,
    retry: RetryConfig,
    events: Arc<EventFeed>,
    /// Undecodable records per collection, kept verbatim.
    foreign: Mutex<HashMap<String, Vec<Record>>>,
}

impl<S: RecordStore> Persistence<S> {
    pub(crate) fn new(store: Arc<S>, retry: RetryConfig, events: Arc<EventFeed>) -> Self {
        Self {
            store,
            retry,
            events,
            foreign: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every decodable record from a collection.
    ///
    /// Records that fail to decode are left out of the result and kept
    /// for [`Persistence::save`] to write back.
    pub(crate) fn load<T: Persisted>(&self, collection: &str) -> SyncResult<Vec<T>> {
        let records = self.store.get_all(collection)?;
        let mut out = Vec::with_capacity(records.len());
        let mut foreign = Vec::new();
        for record in records {
            match decode_record::<T>(&record.bytes) {
                Ok(value) => out.push(value),
                Err(e) => {
                    warn!(
                        collection,
                        key = %record.key,
                        error = %e,
                        "keeping undecodable record untouched"
                    );
                    foreign.push(record);
                }
            }
        }
        debug!(
            collection,
            count = out.len(),
            kept = foreign.len(),
            "loaded records"
        );
        self.foreign.lock().insert(collection.to_string(), foreign);
        Ok(out)
    }

    /// Replaces a collection with `values`. Returns true if the write
    /// reached the store.
    pub(crate) fn save<T: Persisted>(&self, collection: &str, values: &[T]) -> bool {
        let mut records = Vec::with_capacity(values.len());
        for value in values {
            match encode_record(value) {
                Ok(bytes) => records.push(Record::new(value.key(), bytes)),
                Err(e) => {
                    self.report_failure(collection, e.to_string());
                    return false;
                }
            }
        }
        if let Some(foreign) = self.foreign.lock().get(collection) {
            let keys: HashSet<&str> = records.iter().map(|r| r.key.as_str()).collect();
            let kept: Vec<Record> = foreign
                .iter()
                .filter(|r| !keys.contains(r.key.as_str()))
                .cloned()
                .collect();
            records.extend(kept);
        }

        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 0..attempts {
            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self.store.replace_all(collection, records.clone()) {
                Ok(()) => return true,
                Err(e) => {
                    warn!(collection, attempt = attempt + 1, error = %e, "persist failed");
                    last_error = e.to_string();
                }
            }
        }

        self.report_failure(collection, last_error);
        false
    }

    fn report_failure(&self, collection: &str, message: String) {
        warn!(collection, %message, "giving up on persisting collection");
        self.events.emit(SyncEvent::PersistenceFailed {
            collection: collection.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_protocol::{OperationType, Priority, QueuedOperation, SCHEMA_VERSION};
    use medsync_storage::InMemoryStore;
    use ciborium::cbor;

    fn persistence(store: Arc<InMemoryStore>, events: Arc<EventFeed>) -> Persistence<InMemoryStore> {
        Persistence::new(store, RetryConfig::no_retry(), events)
    }

    fn op(doc: &str) -> QueuedOperation {
        QueuedOperation::new(
            OperationType::Create,
            "medications",
            doc,
            Some(vec![1]),
            Priority::Normal,
            "user-1",
        )
    }

    #[test]
    fn save_and_load() {
        let store = Arc::new(InMemoryStore::new());
        let p = persistence(store.clone(), Arc::new(EventFeed::new()));

        let ops = vec![op("a"), op("b")];
        assert!(p.save(QUEUE_COLLECTION, &ops));

        let loaded: Vec<QueuedOperation> = p.load(QUEUE_COLLECTION).unwrap();
        assert_eq!(loaded, ops);
    }

    fn future_record() -> Vec<u8> {
        let version = SCHEMA_VERSION + 1;
        let kind = QueuedOperation::KIND;
        let value = ciborium::cbor!({
            "v" => version,
            "kind" => kind,
            "body" => { "id" => "future-1", "shape" => "unknown" },
        })
        .unwrap();
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn undecodable_records_are_left_out() {
        let store = Arc::new(InMemoryStore::new());
        let p = persistence(store.clone(), Arc::new(EventFeed::new()));
        assert!(p.save(QUEUE_COLLECTION, &[op("a")]));
        store
            .put(QUEUE_COLLECTION, Record::new("junk", vec![0xff, 0x00]))
            .unwrap();

        let loaded: Vec<QueuedOperation> = p.load(QUEUE_COLLECTION).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn newer_records_survive_a_save() {
        let store = Arc::new(InMemoryStore::new());
        let p = persistence(store.clone(), Arc::new(EventFeed::new()));
        let future = Record::new("future-1", future_record());
        store.put(QUEUE_COLLECTION, future.clone()).unwrap();

        let loaded: Vec<QueuedOperation> = p.load(QUEUE_COLLECTION).unwrap();
        assert!(loaded.is_empty());

        let current = op("a");
        assert!(p.save(QUEUE_COLLECTION, &[current.clone()]));

        let stored = store.get_all(QUEUE_COLLECTION).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.contains(&future));
        assert!(stored.iter().any(|r| r.key == current.id));
    }

    #[test]
    fn failed_save_emits_event() {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventFeed::new());
        let rx = events.subscribe();
        let p = persistence(store.clone(), events);

        store.fail_writes(true);
        assert!(!p.save(QUEUE_COLLECTION, &[op("a")]));

        match rx.try_recv().unwrap() {
            SyncEvent::PersistenceFailed { collection, .. } => {
                assert_eq!(collection, QUEUE_COLLECTION)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
