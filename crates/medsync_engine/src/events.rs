//! Sync events and presentation-layer notifications.
//!
//! The orchestrator reports every state change as a [`SyncEvent`] through
//! an [`EventFeed`]. Observers either subscribe to the raw feed or register
//! a [`NotificationSink`] that receives user-facing [`Notification`]s
//! derived from the events.
//!
//! # Usage
//!
//! ```rust,ignore
//! let events = orchestrator.subscribe();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         println!("sync: {event:?}");
//!     }
//! });
//! ```

use crate::queue::DrainReport;
use crate::state::SyncStatus;
use medsync_protocol::{ConflictResolution, Priority};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A state change in the sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connectivity was lost.
    WentOffline,
    /// Connectivity was restored.
    BackOnline,
    /// The orchestrator status changed.
    StatusChanged(SyncStatus),
    /// An operation was added to the queue.
    OperationQueued {
        /// Operation ID.
        id: String,
        /// Target collection.
        collection: String,
        /// Operation priority.
        priority: Priority,
    },
    /// An operation was removed by the caller.
    OperationCancelled {
        /// Operation ID.
        id: String,
    },
    /// A drain pass started.
    SyncStarted {
        /// Operations queued when the pass began.
        pending: usize,
    },
    /// A drain pass finished.
    SyncCompleted(DrainReport),
    /// A drain pass left failures behind.
    SyncFailed {
        /// Failed attempts in the pass.
        failed: usize,
        /// Operations still queued for retry.
        retrying: usize,
    },
    /// A manual sync was requested while offline.
    OfflineSyncRejected,
    /// An operation used up its retries and was dropped.
    RetriesExhausted {
        /// Dropped operation ID.
        operation_id: String,
        /// Target collection.
        collection: String,
        /// Target record.
        document_id: String,
        /// Failed attempts.
        attempts: u32,
    },
    /// A conflict was registered or refreshed.
    ConflictDetected {
        /// Conflict ID.
        conflict_id: String,
        /// Target collection.
        collection: String,
        /// Target record.
        document_id: String,
    },
    /// A conflict was resolved.
    ConflictResolved {
        /// Conflict ID.
        conflict_id: String,
        /// Recorded resolution.
        resolution: ConflictResolution,
    },
    /// A persistence write failed after every retry.
    PersistenceFailed {
        /// Collection that could not be written.
        collection: String,
        /// Last error message.
        message: String,
    },
}

impl SyncEvent {
    /// Returns the user-facing notification for this event, if any.
    pub fn notification(&self) -> Option<Notification> {
        let (level, message) = match self {
            SyncEvent::WentOffline => (
                NotificationLevel::Warning,
                "You are offline. Changes will sync when the connection returns.".to_string(),
            ),
            SyncEvent::BackOnline => (
                NotificationLevel::Info,
                "Back online.".to_string(),
            ),
            SyncEvent::OfflineSyncRejected => (
                NotificationLevel::Warning,
                "Cannot sync while offline.".to_string(),
            ),
            SyncEvent::SyncCompleted(report) if report.succeeded > 0 => (
                NotificationLevel::Success,
                format!("Synced {} change(s).", report.succeeded),
            ),
            SyncEvent::SyncFailed { failed, retrying } => (
                NotificationLevel::Error,
                format!("{failed} change(s) failed to sync, {retrying} will be retried."),
            ),
            SyncEvent::RetriesExhausted { collection, .. } => (
                NotificationLevel::Error,
                format!("A change to {collection} could not be synced and was discarded."),
            ),
            SyncEvent::ConflictDetected { collection, .. } => (
                NotificationLevel::Warning,
                format!("A change to {collection} conflicts with the server copy."),
            ),
            SyncEvent::PersistenceFailed { .. } => (
                NotificationLevel::Error,
                "Pending changes could not be saved on this device.".to_string(),
            ),
            _ => return None,
        };
        Some(Notification { level, message })
    }
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// Neutral information.
    Info,
    /// Something completed.
    Success,
    /// Attention needed, nothing lost.
    Warning,
    /// Data was not synced.
    Error,
}

/// A user-facing message derived from a sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Severity.
    pub level: NotificationLevel,
    /// Display text.
    pub message: String,
}

/// Presentation-layer receiver of notifications (toasts, banners).
pub trait NotificationSink: Send + Sync {
    /// Shows a notification.
    fn notify(&self, notification: &Notification);
}

/// Distributes sync events to subscribers and notification sinks.
///
/// The feed:
/// - Preserves emission order per subscriber
/// - Drops subscribers whose receiver was dropped
/// - Is thread-safe
#[derive(Default)]
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
}

impl EventFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Registers a notification sink.
    pub fn add_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.sinks.write().push(sink);
    }

    /// Emits an event to every subscriber and, if it maps to a
    /// notification, to every sink.
    pub fn emit(&self, event: SyncEvent) {
        if let Some(notification) = event.notification() {
            let sinks = self.sinks.read().clone();
            for sink in sinks {
                sink.notify(&notification);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl std::fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("subscribers", &self.subscribers.read().len())
            .field("sinks", &self.sinks.read().len())
            .finish()
    }
}
