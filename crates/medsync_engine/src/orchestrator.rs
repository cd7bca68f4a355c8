//! The sync orchestrator.
//!
//! Owns the operation queue and conflict registry, drives the
//! online/offline/syncing/error state machine, and is the only place that
//! decides when the queue is drained.
//!
//! # Triggers
//!
//! A drain pass runs on:
//! - [`SyncOrchestrator::sync_now`] / [`SyncOrchestrator::force_sync`]
//! - [`SyncOrchestrator::connectivity_restored`] with a non-empty queue
//!
//! Nothing else drains the queue. Hosts that want periodic retries read
//! [`SyncOrchestrator::retry_delay`] and schedule `sync_now` themselves.

use crate::auth::AuthContext;
use crate::config::SyncConfig;
use crate::conflicts::ConflictRegistry;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventFeed, NotificationSink, SyncEvent};
use crate::executor::{ExecutorRegistry, OperationExecutor};
use crate::persist::{Persistence, META_COLLECTION};
use crate::queue::{DrainReport, OperationQueue};
use crate::state::SyncStatus;
use crate::stats::{StatsTracker, SyncStats};
use medsync_protocol::{
    unix_millis, ConflictStrategy, OperationType, Priority, QueuedOperation, SyncConflict,
};
use medsync_storage::RecordStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coordinates offline writes, drains and conflict bookkeeping.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(FileStore::open(&dir)?);
/// let auth = Arc::new(SessionAuth::signed_in("user-1"));
/// let sync = SyncOrchestrator::open(SyncConfig::default(), store, auth, true)?;
/// sync.register_executor("medications", MedicationsApi::new(client));
///
/// sync.queue_operation(OperationType::Update, "medications", "med-1", Some(body), Priority::High)?;
/// let report = sync.sync_now()?;
/// ```
pub struct SyncOrchestrator<S: RecordStore> {
    config: SyncConfig,
    queue: OperationQueue<S>,
    conflicts: ConflictRegistry<S>,
    meta: Persistence<S>,
    executors: RwLock<ExecutorRegistry>,
    stats: Arc<StatsTracker>,
    events: Arc<EventFeed>,
    status: RwLock<SyncStatus>,
    online: AtomicBool,
    syncing: AtomicBool,
    failed_passes: AtomicU32,
}

/// Clears the in-progress flag when a pass ends, even by panic.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: RecordStore> SyncOrchestrator<S> {
    /// Opens the orchestrator over `store`, loading the persisted queue,
    /// conflicts and statistics cache.
    ///
    /// `online` is the platform connectivity at startup.
    pub fn open(
        config: SyncConfig,
        store: Arc<S>,
        auth: Arc<dyn AuthContext>,
        online: bool,
    ) -> SyncResult<Self> {
        let stats = Arc::new(StatsTracker::new());
        let events = Arc::new(EventFeed::new());

        let queue = OperationQueue::new(
            store.clone(),
            auth,
            &config,
            stats.clone(),
            events.clone(),
        );
        let conflicts = ConflictRegistry::new(store.clone(), &config, stats.clone(), events.clone());
        let meta = Persistence::new(store, config.persist_retry.clone(), events.clone());

        if let Some(cached) = meta.load::<SyncStats>(META_COLLECTION)?.into_iter().next() {
            stats.restore(cached);
        }
        let failed_before = stats.snapshot().failed_syncs;
        queue.load()?;
        conflicts.load()?;
        if stats.snapshot().failed_syncs != failed_before {
            meta.save(META_COLLECTION, &[stats.snapshot()]);
        }

        let status = if online {
            SyncStatus::Online
        } else {
            SyncStatus::Offline
        };
        info!(%status, pending = queue.len(), "sync orchestrator opened");

        Ok(Self {
            config,
            queue,
            conflicts,
            meta,
            executors: RwLock::new(ExecutorRegistry::new()),
            stats,
            events,
            status: RwLock::new(status),
            online: AtomicBool::new(online),
            syncing: AtomicBool::new(false),
            failed_passes: AtomicU32::new(0),
        })
    }

    // ---- executors ----

    /// Registers the executor for every operation on `collection`.
    pub fn register_executor<E>(&self, collection: impl Into<String>, executor: E)
    where
        E: OperationExecutor + 'static,
    {
        self.executors.write().register(collection, executor);
    }

    /// Registers the executor for one operation type on `collection`.
    pub fn register_executor_for<E>(
        &self,
        collection: impl Into<String>,
        op_type: OperationType,
        executor: E,
    ) where
        E: OperationExecutor + 'static,
    {
        self.executors
            .write()
            .register_for(collection, op_type, executor);
    }

    /// Replaces all registered executors.
    pub fn set_executors(&self, registry: ExecutorRegistry) {
        *self.executors.write() = registry;
    }

    // ---- queue ----

    /// Queues a write for the signed-in user.
    pub fn queue_operation(
        &self,
        op_type: OperationType,
        collection: impl Into<String>,
        document_id: impl Into<String>,
        data: Option<Vec<u8>>,
        priority: Priority,
    ) -> SyncResult<String> {
        self.queue
            .enqueue(op_type, collection, document_id, data, priority)
    }

    /// Cancels a queued operation. Returns true if it was removed.
    pub fn cancel_operation(&self, id: &str) -> bool {
        self.queue.dequeue(id)
    }

    // ---- sync ----

    /// Drains the queue if online.
    ///
    /// While offline this returns an empty report without touching any
    /// executor and emits a single [`SyncEvent::OfflineSyncRejected`].
    pub fn sync_now(&self) -> SyncResult<DrainReport> {
        if !self.connectivity() {
            info!("sync requested while offline");
            self.events.emit(SyncEvent::OfflineSyncRejected);
            return Ok(DrainReport::default());
        }
        self.run_pass()
    }

    /// Drains the queue, failing with [`SyncError::CannotSyncOffline`]
    /// while offline.
    pub fn force_sync(&self) -> SyncResult<DrainReport> {
        if !self.connectivity() {
            return Err(SyncError::CannotSyncOffline);
        }
        self.run_pass()
    }

    fn run_pass(&self) -> SyncResult<DrainReport> {
        match self.status() {
            status if status.can_sync() => {}
            SyncStatus::Syncing => return Err(SyncError::SyncInProgress),
            _ => return Err(SyncError::CannotSyncOffline),
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::SyncInProgress);
        }
        let _guard = PassGuard(&self.syncing);

        let pending = self.queue.len();
        self.set_status(SyncStatus::Syncing);
        self.events.emit(SyncEvent::SyncStarted { pending });
        info!(pending, "sync pass started");

        let executors = self.executors.read().clone();
        let outcome = self.queue.drain(&executors);

        for (op, conflict) in outcome.conflicts {
            self.conflicts.register(
                &op.collection,
                &op.document_id,
                conflict.local_data,
                conflict.server_data,
                conflict.local_timestamp,
                conflict.server_timestamp,
            );
        }

        let report = outcome.report;
        self.stats.finish_pass(unix_millis());

        if report.retrying > 0 {
            self.failed_passes.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failed_passes.store(0, Ordering::Release);
        }

        let next = if !self.connectivity() {
            SyncStatus::Offline
        } else if report.retrying > 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Online
        };
        self.set_status(next);
        self.persist_stats();

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            exhausted = report.exhausted,
            conflicts = report.conflicts,
            skipped = report.skipped,
            remaining = report.remaining,
            "sync pass finished"
        );
        self.events.emit(SyncEvent::SyncCompleted(report.clone()));
        if report.has_failures() {
            self.events.emit(SyncEvent::SyncFailed {
                failed: report.failed,
                retrying: report.retrying,
            });
        }
        Ok(report)
    }

    /// Backoff before the next automatic retry, if the last pass left
    /// operations waiting.
    ///
    /// Returns `None` after a clean pass, or once the consecutive failed
    /// passes exceed the configured attempts.
    pub fn retry_delay(&self) -> Option<Duration> {
        let failed = self.failed_passes.load(Ordering::Acquire);
        if failed == 0 || failed > self.config.retry.max_attempts {
            return None;
        }
        Some(self.config.retry.delay_for_attempt(failed))
    }

    // ---- connectivity ----

    /// Handles the platform reporting loss of connectivity.
    pub fn connectivity_lost(&self) {
        let was_online = self.online.swap(false, Ordering::AcqRel);
        self.set_status(SyncStatus::Offline);
        if was_online {
            info!("connectivity lost");
            self.events.emit(SyncEvent::WentOffline);
        }
    }

    /// Handles the platform reporting restored connectivity.
    ///
    /// Drains the queue when it holds operations. Returns the report of
    /// that drain, if one ran.
    pub fn connectivity_restored(&self) -> Option<DrainReport> {
        if self.online.swap(true, Ordering::AcqRel) {
            debug!("connectivity restored while already online");
            return None;
        }

        info!("connectivity restored");
        self.set_status(SyncStatus::Online);
        self.events.emit(SyncEvent::BackOnline);

        if self.queue.is_empty() {
            return None;
        }
        match self.run_pass() {
            Ok(report) => Some(report),
            Err(e) if e.is_retryable() => {
                debug!(error = %e, "automatic sync after reconnect deferred");
                None
            }
            Err(e) => {
                warn!(error = %e, "automatic sync after reconnect did not run");
                None
            }
        }
    }

    // ---- conflicts ----

    /// Registers a divergence reported outside a drain pass.
    pub fn register_conflict(
        &self,
        collection: &str,
        document_id: &str,
        local_data: Option<Vec<u8>>,
        server_data: Option<Vec<u8>>,
        local_timestamp: u64,
        server_timestamp: u64,
    ) -> SyncConflict {
        self.conflicts.register(
            collection,
            document_id,
            local_data,
            server_data,
            local_timestamp,
            server_timestamp,
        )
    }

    /// Resolves a conflict with a deterministic strategy.
    pub fn resolve_conflict(&self, id: &str, strategy: ConflictStrategy) -> bool {
        self.conflicts.resolve(id, strategy)
    }

    /// Resolves a conflict with a merged payload.
    pub fn resolve_conflict_with_merge(&self, id: &str, merged: Option<Vec<u8>>) -> bool {
        self.conflicts.resolve_with_merge(id, merged)
    }

    /// Removes resolved conflicts. Returns how many were removed.
    pub fn clear_resolved_conflicts(&self) -> usize {
        self.conflicts.clear_resolved()
    }

    // ---- observable state ----

    /// Returns true if the platform reports connectivity.
    pub fn connectivity(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.read()
    }

    /// Returns the number of queued operations.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Returns the queued operations in processing order.
    pub fn pending_operations(&self) -> Vec<QueuedOperation> {
        self.queue.operations()
    }

    /// Returns the conflicts awaiting resolution.
    pub fn unresolved_conflicts(&self) -> Vec<SyncConflict> {
        self.conflicts.unresolved()
    }

    /// Returns a conflict by id.
    pub fn conflict(&self, id: &str) -> Option<SyncConflict> {
        self.conflicts.get(id)
    }

    /// Returns the aggregate statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    /// Returns the operation queue.
    pub fn queue(&self) -> &OperationQueue<S> {
        &self.queue
    }

    /// Returns the conflict registry.
    pub fn conflicts(&self) -> &ConflictRegistry<S> {
        &self.conflicts
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Registers a presentation-layer notification sink.
    pub fn add_notification_sink(&self, sink: Arc<dyn NotificationSink>) {
        self.events.add_sink(sink);
    }

    fn set_status(&self, next: SyncStatus) {
        let previous = std::mem::replace(&mut *self.status.write(), next);
        if previous != next {
            debug!(from = %previous, to = %next, "status changed");
            self.events.emit(SyncEvent::StatusChanged(next));
        }
    }

    fn persist_stats(&self) {
        self.meta.save(META_COLLECTION, &[self.stats.snapshot()]);
    }
}

impl<S: RecordStore> std::fmt::Debug for SyncOrchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("status", &self.status())
            .field("online", &self.connectivity())
            .field("queue", &self.queue)
            .field("conflicts", &self.conflicts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionAuth;
    use crate::config::RetryConfig;
    use crate::executor::{ExecutionError, ExecutionOutcome};
    use medsync_storage::InMemoryStore;

    fn applied(_: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        Ok(ExecutionOutcome::Applied)
    }

    fn failing(_: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        Err(ExecutionError::transient("503"))
    }

    fn orchestrator(online: bool) -> SyncOrchestrator<InMemoryStore> {
        let config = SyncConfig::new()
            .with_persist_retry(RetryConfig::no_retry())
            .with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(100))
                    .with_jitter(false),
            );
        SyncOrchestrator::open(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(SessionAuth::signed_in("user-1")),
            online,
        )
        .unwrap()
    }

    fn queue(sync: &SyncOrchestrator<InMemoryStore>, doc: &str) -> String {
        sync.queue_operation(
            OperationType::Update,
            "medications",
            doc,
            Some(vec![1]),
            Priority::Normal,
        )
        .unwrap()
    }

    #[test]
    fn initial_status_follows_connectivity() {
        assert_eq!(orchestrator(true).status(), SyncStatus::Online);
        assert_eq!(orchestrator(false).status(), SyncStatus::Offline);
    }

    #[test]
    fn nested_sync_during_pass_is_rejected() {
        let sync = Arc::new(orchestrator(true));
        let handle: Arc<std::sync::OnceLock<std::sync::Weak<SyncOrchestrator<InMemoryStore>>>> =
            Arc::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let handle = handle.clone();
            let seen = seen.clone();
            sync.register_executor(
                "medications",
                move |_: &QueuedOperation| -> Result<ExecutionOutcome, ExecutionError> {
                    if let Some(sync) = handle.get().and_then(std::sync::Weak::upgrade) {
                        let rejected =
                            matches!(sync.force_sync(), Err(SyncError::SyncInProgress));
                        seen.lock().push((sync.status(), rejected));
                    }
                    Ok(ExecutionOutcome::Applied)
                },
            );
        }
        assert!(handle.set(Arc::downgrade(&sync)).is_ok());
        queue(&sync, "a");

        let report = sync.sync_now().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(*seen.lock(), vec![(SyncStatus::Syncing, true)]);
        assert_eq!(sync.status(), SyncStatus::Online);
    }

    #[test]
    fn clean_pass_returns_online() {
        let sync = orchestrator(true);
        sync.register_executor("medications", applied);
        queue(&sync, "a");

        let report = sync.sync_now().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(sync.status(), SyncStatus::Online);
        assert!(sync.stats().last_sync_time.is_some());
        assert_eq!(sync.retry_delay(), None);
    }

    #[test]
    fn failed_pass_enters_error_and_backs_off() {
        let sync = orchestrator(true);
        sync.register_executor("medications", failing);
        queue(&sync, "a");

        sync.sync_now().unwrap();
        assert_eq!(sync.status(), SyncStatus::Error);
        assert_eq!(sync.retry_delay(), Some(Duration::from_millis(100)));

        sync.sync_now().unwrap();
        assert_eq!(sync.retry_delay(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn force_sync_offline_fails() {
        let sync = orchestrator(false);
        assert!(matches!(sync.force_sync(), Err(SyncError::CannotSyncOffline)));
    }

    #[test]
    fn connectivity_events_fire_on_transition_only() {
        let sync = orchestrator(true);
        let events = sync.subscribe();

        sync.connectivity_lost();
        sync.connectivity_lost();
        assert_eq!(sync.status(), SyncStatus::Offline);

        let went_offline = events
            .try_iter()
            .filter(|e| *e == SyncEvent::WentOffline)
            .count();
        assert_eq!(went_offline, 1);
    }

    #[test]
    fn reconnect_drains_queue() {
        let sync = orchestrator(false);
        sync.register_executor("medications", applied);
        queue(&sync, "a");

        let report = sync.connectivity_restored().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(sync.pending_count(), 0);
        assert_eq!(sync.status(), SyncStatus::Online);

        assert!(sync.connectivity_restored().is_none());
    }

    #[test]
    fn reconnect_with_empty_queue_does_not_drain() {
        let sync = orchestrator(false);
        assert!(sync.connectivity_restored().is_none());
        assert!(sync.stats().last_sync_time.is_none());
    }

    #[test]
    fn executor_conflicts_reach_the_registry() {
        let sync = orchestrator(true);
        sync.register_executor(
            "medications",
            |op: &QueuedOperation| -> Result<ExecutionOutcome, ExecutionError> {
                Ok(ExecutionOutcome::Conflict(crate::executor::DetectedConflict {
                    local_data: op.data.clone(),
                    server_data: None,
                    local_timestamp: 10,
                    server_timestamp: 20,
                }))
            },
        );
        queue(&sync, "med-7");

        let report = sync.sync_now().unwrap();
        assert_eq!(report.conflicts, 1);

        let unresolved = sync.unresolved_conflicts();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].document_id, "med-7");
        assert_eq!(sync.stats().conflicted_operations, 1);
        assert_eq!(sync.stats().unresolved_conflicts, 1);
    }
}
