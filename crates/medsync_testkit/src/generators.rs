//! Property-based test generators using proptest.
//!
//! Provides strategies for generating queued writes and conflicts that
//! respect the data model's invariants.

use crate::fixtures::COLLECTIONS;
use medsync_protocol::{OperationType, Priority};
use proptest::prelude::*;

/// A write to be queued, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSpec {
    /// Kind of write.
    pub op_type: OperationType,
    /// Target collection.
    pub collection: String,
    /// Target record.
    pub document_id: String,
    /// Payload; `None` for deletes.
    pub data: Option<Vec<u8>>,
    /// Priority.
    pub priority: Priority,
}

/// Strategy for generating priorities.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Critical),
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low),
    ]
}

/// Strategy for generating operation types.
pub fn op_type_strategy() -> impl Strategy<Value = OperationType> {
    prop_oneof![
        Just(OperationType::Create),
        Just(OperationType::Update),
        Just(OperationType::Delete),
    ]
}

/// Strategy for picking one of the application collections.
pub fn collection_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(COLLECTIONS.to_vec()).prop_map(str::to_string)
}

/// Strategy for generating document ids.
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}-[0-9]{1,4}").expect("Invalid regex")
}

/// Strategy for generating record payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for generating a single write.
pub fn write_strategy() -> impl Strategy<Value = WriteSpec> {
    (
        op_type_strategy(),
        collection_strategy(),
        document_id_strategy(),
        payload_strategy(),
        priority_strategy(),
    )
        .prop_map(|(op_type, collection, document_id, payload, priority)| {
            let data = match op_type {
                OperationType::Delete => None,
                _ => Some(payload),
            };
            WriteSpec {
                op_type,
                collection,
                document_id,
                data,
                priority,
            }
        })
}

/// Strategy for generating a batch of writes.
pub fn writes_strategy(max: usize) -> impl Strategy<Value = Vec<WriteSpec>> {
    prop::collection::vec(write_strategy(), 1..=max.max(1))
}

/// Strategy for generating `(local_timestamp, server_timestamp)` pairs.
pub fn timestamp_pair_strategy() -> impl Strategy<Value = (u64, u64)> {
    let ts = 1_600_000_000_000u64..1_900_000_000_000u64;
    (ts.clone(), ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn deletes_never_carry_data(write in write_strategy()) {
            if write.op_type == OperationType::Delete {
                prop_assert!(write.data.is_none());
            } else {
                prop_assert!(write.data.is_some());
            }
            prop_assert!(COLLECTIONS.contains(&write.collection.as_str()));
        }

        #[test]
        fn batches_are_bounded(writes in writes_strategy(8)) {
            prop_assert!(!writes.is_empty());
            prop_assert!(writes.len() <= 8);
        }
    }
}
