//! # MedSync Engine
//!
//! Offline sync core for MedSync.
//!
//! This crate provides:
//! - [`OperationQueue`]: persistent, priority-ordered queue of pending writes
//! - [`ConflictRegistry`]: persistent list of local/server divergences
//! - [`SyncOrchestrator`]: online/offline/syncing/error state machine that
//!   drains the queue through registered executors
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               SyncOrchestrator               │
//! │  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │  OperationQueue  │  │ ConflictRegistry │  │
//! │  └────────┬─────────┘  └────────┬─────────┘  │
//! │           │   ExecutorRegistry  │            │
//! │           ▼                     ▼            │
//! │  ┌────────────────────────────────────────┐  │
//! │  │        RecordStore (sync_queue,        │  │
//! │  │      sync_conflicts, sync_meta)        │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────┬───────────────────────┘
//!                        │ SyncEvent
//!                        ▼
//!          subscribers / NotificationSink
//! ```
//!
//! The engine performs no network I/O. Remote writes go through
//! [`OperationExecutor`]s registered per collection.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod conflicts;
pub mod connectivity;
mod error;
mod events;
mod executor;
mod orchestrator;
mod persist;
mod queue;
mod state;
mod stats;

pub use auth::{AuthContext, SessionAuth};
pub use config::{RetryConfig, SyncConfig};
pub use conflicts::ConflictRegistry;
pub use error::{SyncError, SyncResult};
pub use events::{EventFeed, Notification, NotificationLevel, NotificationSink, SyncEvent};
pub use executor::{
    DetectedConflict, ExecutionError, ExecutionOutcome, ExecutorRegistry, OperationExecutor,
};
pub use orchestrator::SyncOrchestrator;
pub use persist::{CONFLICTS_COLLECTION, META_COLLECTION, QUEUE_COLLECTION};
pub use queue::{DrainOutcome, DrainReport, OperationQueue};
pub use state::SyncStatus;
pub use stats::{StatsTracker, SyncStats};

pub use medsync_protocol::{
    ConflictResolution, ConflictStrategy, OperationType, Priority, QueuedOperation, SyncConflict,
};
