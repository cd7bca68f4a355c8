//! # MedSync Protocol
//!
//! Data model for the MedSync offline sync core.
//!
//! This crate provides:
//! - [`QueuedOperation`] for pending create/update/delete writes
//! - [`SyncConflict`] for divergent local/server versions of a record
//! - [`ConflictStrategy`] for deterministic conflict resolution
//! - A versioned CBOR record envelope for persistence
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod envelope;
mod error;
mod operation;

pub use conflict::{ConflictResolution, ConflictStrategy, SyncConflict};
pub use envelope::{decode_record, encode_record, Persisted, SCHEMA_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::{
    generate_operation_id, unix_millis, OperationType, Priority, QueuedOperation,
    DEFAULT_MAX_RETRIES,
};
