//! Aggregate sync statistics.
//!
//! Pending and conflict counts are derived from the queue and registry
//! and recomputed on load. The cumulative counters are cached in the
//! `sync_meta` collection so they survive restarts.

use medsync_protocol::Persisted;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const STATS_KEY: &str = "stats";

/// Snapshot of the sync counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Operations currently queued.
    pub pending_operations: usize,
    /// Operations applied by an executor.
    pub successful_syncs: u64,
    /// Operations dropped after exhausting retries or failing permanently.
    pub failed_syncs: u64,
    /// Conflicts that have been resolved.
    pub resolved_conflicts: usize,
    /// Conflicts awaiting resolution.
    pub unresolved_conflicts: usize,
    /// Operations whose execution reported a conflict.
    #[serde(default)]
    pub conflicted_operations: u64,
    /// Completion time of the last drain pass (unix millis).
    pub last_sync_time: Option<u64>,
    /// Message of the last execution failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Persisted for SyncStats {
    const KIND: &'static str = "sync_stats";

    fn key(&self) -> &str {
        STATS_KEY
    }
}

/// Thread-safe holder for [`SyncStats`].
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: RwLock<SyncStats>,
}

impl StatsTracker {
    /// Creates a tracker with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an applied operation.
    pub fn record_success(&self) {
        self.stats.write().successful_syncs += 1;
    }

    /// Records an operation that was dropped as failed.
    pub fn record_failure(&self, message: impl Into<String>) {
        let mut stats = self.stats.write();
        stats.failed_syncs += 1;
        stats.last_error = Some(message.into());
    }

    /// Records a failed attempt that will be retried.
    pub fn record_error(&self, message: impl Into<String>) {
        self.stats.write().last_error = Some(message.into());
    }

    /// Records an operation whose execution reported a conflict.
    pub fn record_conflicted(&self) {
        self.stats.write().conflicted_operations += 1;
    }

    /// Sets the pending operation count.
    pub fn set_pending(&self, pending: usize) {
        self.stats.write().pending_operations = pending;
    }

    /// Sets the conflict counts.
    pub fn set_conflict_counts(&self, resolved: usize, unresolved: usize) {
        let mut stats = self.stats.write();
        stats.resolved_conflicts = resolved;
        stats.unresolved_conflicts = unresolved;
    }

    /// Stamps the end of a drain pass.
    pub fn finish_pass(&self, at: u64) {
        self.stats.write().last_sync_time = Some(at);
    }

    /// Returns a copy of the current counters.
    pub fn snapshot(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Restores cumulative counters from a cached snapshot.
    ///
    /// Derived counts are left alone; they come from the live queue and
    /// registry.
    pub fn restore(&self, cached: SyncStats) {
        let mut stats = self.stats.write();
        stats.successful_syncs = cached.successful_syncs;
        stats.failed_syncs = cached.failed_syncs;
        stats.conflicted_operations = cached.conflicted_operations;
        stats.last_sync_time = cached.last_sync_time;
        stats.last_error = cached.last_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_protocol::{decode_record, encode_record};

    #[test]
    fn counters() {
        let tracker = StatsTracker::new();
        tracker.record_success();
        tracker.record_success();
        tracker.record_failure("timeout");
        tracker.record_conflicted();
        tracker.set_pending(4);
        tracker.set_conflict_counts(1, 2);
        tracker.finish_pass(1_000);

        let stats = tracker.snapshot();
        assert_eq!(stats.successful_syncs, 2);
        assert_eq!(stats.failed_syncs, 1);
        assert_eq!(stats.conflicted_operations, 1);
        assert_eq!(stats.pending_operations, 4);
        assert_eq!(stats.resolved_conflicts, 1);
        assert_eq!(stats.unresolved_conflicts, 2);
        assert_eq!(stats.last_sync_time, Some(1_000));
        assert_eq!(stats.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn restore_keeps_derived_counts() {
        let tracker = StatsTracker::new();
        tracker.set_pending(3);

        let cached = SyncStats {
            pending_operations: 99,
            successful_syncs: 7,
            failed_syncs: 2,
            ..Default::default()
        };
        tracker.restore(cached);

        let stats = tracker.snapshot();
        assert_eq!(stats.pending_operations, 3);
        assert_eq!(stats.successful_syncs, 7);
        assert_eq!(stats.failed_syncs, 2);
    }

    #[test]
    fn stats_envelope() {
        let stats = SyncStats {
            successful_syncs: 5,
            last_sync_time: Some(42),
            ..Default::default()
        };
        let bytes = encode_record(&stats).unwrap();
        let decoded: SyncStats = decode_record(&bytes).unwrap();
        assert_eq!(decoded, stats);
    }
}
