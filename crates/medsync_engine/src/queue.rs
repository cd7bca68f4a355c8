//! Persistent priority queue of pending write operations.
//!
//! The queue is the write-ahead log of the sync core: every local mutation
//! that still has to reach the server sits here until an executor applies
//! it or it runs out of retries.
//!
//! # Ordering
//!
//! Operations are kept sorted by [`Priority`] (critical first). The sort is
//! stable, so operations of equal priority keep their enqueue order, and
//! the persisted snapshot reloads in the same order.
//!
//! [`Priority`]: medsync_protocol::Priority

use crate::auth::AuthContext;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventFeed, SyncEvent};
use crate::executor::{DetectedConflict, ExecutionOutcome, OperationExecutor};
use crate::persist::{Persistence, QUEUE_COLLECTION};
use crate::stats::StatsTracker;
use medsync_protocol::{OperationType, Priority, QueuedOperation};
use medsync_storage::RecordStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts from a single drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations applied and removed.
    pub succeeded: usize,
    /// Failed execution attempts.
    pub failed: usize,
    /// Failed operations kept for another attempt.
    pub retrying: usize,
    /// Failed operations dropped for good.
    pub exhausted: usize,
    /// Operations removed because the server copy diverged.
    pub conflicts: usize,
    /// Operations with no executor, left untouched.
    pub skipped: usize,
    /// Operations queued after the pass.
    pub remaining: usize,
}

impl DrainReport {
    /// Returns true if any execution attempt failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Result of [`OperationQueue::drain`]: the report plus the conflicts
/// reported by executors, paired with the operation that hit them.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Pass counts.
    pub report: DrainReport,
    /// Conflicts to hand to the registry.
    pub conflicts: Vec<(QueuedOperation, DetectedConflict)>,
}

/// The operation queue.
///
/// All methods take `&self`; the queue is shared by the orchestrator and
/// any thread that enqueues writes.
pub struct OperationQueue<S: RecordStore> {
    operations: RwLock<Vec<QueuedOperation>>,
    /// Serializes snapshot-and-write so an older snapshot never lands last.
    persist_lock: Mutex<()>,
    auth: Arc<dyn AuthContext>,
    max_retries: u32,
    persistence: Persistence<S>,
    stats: Arc<StatsTracker>,
    events: Arc<EventFeed>,
}

impl<S: RecordStore> OperationQueue<S> {
    /// Creates an empty queue backed by `store`.
    ///
    /// Call [`OperationQueue::load`] to pick up a persisted snapshot.
    pub fn new(
        store: Arc<S>,
        auth: Arc<dyn AuthContext>,
        config: &SyncConfig,
        stats: Arc<StatsTracker>,
        events: Arc<EventFeed>,
    ) -> Self {
        Self {
            operations: RwLock::new(Vec::new()),
            persist_lock: Mutex::new(()),
            auth,
            max_retries: config.max_retries.max(1),
            persistence: Persistence::new(store, config.persist_retry.clone(), events.clone()),
            stats,
            events,
        }
    }

    /// Replaces the in-memory queue with the persisted snapshot.
    ///
    /// Returns the number of operations loaded.
    pub fn load(&self) -> SyncResult<usize> {
        let persisted: Vec<QueuedOperation> = self.persistence.load(QUEUE_COLLECTION)?;

        let (exhausted, mut loaded): (Vec<_>, Vec<_>) =
            persisted.into_iter().partition(QueuedOperation::is_exhausted);
        for op in &exhausted {
            warn!(
                id = %op.id,
                collection = %op.collection,
                attempts = op.retry_count,
                "discarding persisted operation with no retries left"
            );
            self.stats
                .record_failure(format!("operation {} had no retries left", op.id));
            self.events.emit(SyncEvent::RetriesExhausted {
                operation_id: op.id.clone(),
                collection: op.collection.clone(),
                document_id: op.document_id.clone(),
                attempts: op.retry_count,
            });
        }
        loaded.sort_by_key(|op| op.priority);

        let count = loaded.len();
        *self.operations.write() = loaded;
        if !exhausted.is_empty() {
            self.persist();
        }
        self.stats.set_pending(count);
        info!(count, dropped = exhausted.len(), "operation queue loaded");
        Ok(count)
    }

    /// Queues a write for the signed-in user and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AuthenticationRequired`] if nobody is signed in.
    pub fn enqueue(
        &self,
        op_type: OperationType,
        collection: impl Into<String>,
        document_id: impl Into<String>,
        data: Option<Vec<u8>>,
        priority: Priority,
    ) -> SyncResult<String> {
        let user_id = self
            .auth
            .current_user_id()
            .filter(|id| !id.is_empty())
            .ok_or(SyncError::AuthenticationRequired)?;

        let op = QueuedOperation::new(op_type, collection, document_id, data, priority, user_id)
            .with_max_retries(self.max_retries);
        let id = op.id.clone();
        let collection = op.collection.clone();
        debug!(id = %id, %collection, op_type = %op.op_type, %priority, "enqueue");

        let pending = {
            let mut ops = self.operations.write();
            ops.push(op);
            ops.sort_by_key(|op| op.priority);
            ops.len()
        };

        self.persist();
        self.stats.set_pending(pending);
        self.events.emit(SyncEvent::OperationQueued {
            id: id.clone(),
            collection,
            priority,
        });
        Ok(id)
    }

    /// Removes an operation regardless of its state.
    ///
    /// Returns true if an operation was removed.
    pub fn dequeue(&self, id: &str) -> bool {
        let (removed, pending) = {
            let mut ops = self.operations.write();
            let before = ops.len();
            ops.retain(|op| op.id != id);
            (ops.len() < before, ops.len())
        };

        if removed {
            debug!(id, "dequeue");
            self.persist();
            self.stats.set_pending(pending);
            self.events.emit(SyncEvent::OperationCancelled { id: id.to_string() });
        }
        removed
    }

    /// Runs every queued operation through `executor`, one at a time, in
    /// priority order.
    ///
    /// Iterates a snapshot taken at the start of the pass. An operation
    /// dequeued during the pass is not executed, and operations enqueued
    /// during the pass are kept for the next one. No lock is held while
    /// the executor runs.
    pub fn drain(&self, executor: &dyn OperationExecutor) -> DrainOutcome {
        let snapshot = self.operations();
        let mut outcome = DrainOutcome::default();
        let mut finished: HashSet<String> = HashSet::new();
        let mut retried: HashMap<String, u32> = HashMap::new();

        for mut op in snapshot {
            if !self.contains(&op.id) {
                debug!(id = %op.id, "operation cancelled before execution");
                continue;
            }

            match executor.execute(&op) {
                Ok(ExecutionOutcome::Applied) => {
                    debug!(id = %op.id, "applied");
                    outcome.report.succeeded += 1;
                    self.stats.record_success();
                    finished.insert(op.id.clone());
                }
                Ok(ExecutionOutcome::Conflict(conflict)) => {
                    debug!(id = %op.id, document_id = %op.document_id, "conflict");
                    outcome.report.conflicts += 1;
                    self.stats.record_conflicted();
                    finished.insert(op.id.clone());
                    outcome.conflicts.push((op, conflict));
                }
                Ok(ExecutionOutcome::Skipped) => {
                    debug!(id = %op.id, collection = %op.collection, "no executor");
                    outcome.report.skipped += 1;
                }
                Err(e) => {
                    outcome.report.failed += 1;
                    let exhausted = op.record_failure() || e.permanent;
                    if exhausted {
                        let err = SyncError::RetriesExhausted {
                            operation_id: op.id.clone(),
                            attempts: op.retry_count,
                        };
                        warn!(
                            collection = %op.collection,
                            document_id = %op.document_id,
                            permanent = e.permanent,
                            error = %e,
                            "{err}"
                        );
                        outcome.report.exhausted += 1;
                        self.stats.record_failure(e.message);
                        self.events.emit(SyncEvent::RetriesExhausted {
                            operation_id: op.id.clone(),
                            collection: op.collection.clone(),
                            document_id: op.document_id.clone(),
                            attempts: op.retry_count,
                        });
                        finished.insert(op.id);
                    } else {
                        debug!(
                            id = %op.id,
                            attempt = op.retry_count,
                            max = op.max_retries,
                            error = %e,
                            "will retry"
                        );
                        outcome.report.retrying += 1;
                        self.stats.record_error(e.message);
                        retried.insert(op.id, op.retry_count);
                    }
                }
            }
        }

        let remaining = {
            let mut ops = self.operations.write();
            ops.retain(|op| !finished.contains(&op.id));
            for op in ops.iter_mut() {
                if let Some(&count) = retried.get(&op.id) {
                    op.retry_count = count;
                }
            }
            ops.sort_by_key(|op| op.priority);
            ops.len()
        };
        outcome.report.remaining = remaining;

        self.persist();
        self.stats.set_pending(remaining);
        outcome
    }

    /// Returns a copy of the queue in processing order.
    pub fn operations(&self) -> Vec<QueuedOperation> {
        self.operations.read().clone()
    }

    /// Returns the operation with the given id.
    pub fn get(&self, id: &str) -> Option<QueuedOperation> {
        self.operations.read().iter().find(|op| op.id == id).cloned()
    }

    /// Returns the queued operations targeting `collection`.
    pub fn pending_for(&self, collection: &str) -> Vec<QueuedOperation> {
        self.operations
            .read()
            .iter()
            .filter(|op| op.collection == collection)
            .cloned()
            .collect()
    }

    /// Returns the number of queued operations.
    pub fn len(&self) -> usize {
        self.operations.read().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }

    fn contains(&self, id: &str) -> bool {
        self.operations.read().iter().any(|op| op.id == id)
    }

    fn persist(&self) -> bool {
        let _guard = self.persist_lock.lock();
        let snapshot = self.operations();
        self.persistence.save(QUEUE_COLLECTION, &snapshot)
    }
}

impl<S: RecordStore> std::fmt::Debug for OperationQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("len", &self.len())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
