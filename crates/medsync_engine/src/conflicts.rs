//! Persistent registry of local/server divergences.
//!
//! Conflicts are only created by executors reporting a divergence (or by
//! the host calling [`ConflictRegistry::register`] directly) and are only
//! removed by [`ConflictRegistry::clear_resolved`]. Resolution is always
//! an explicit call.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::events::{EventFeed, SyncEvent};
use crate::persist::{Persistence, CONFLICTS_COLLECTION};
use crate::stats::StatsTracker;
use medsync_protocol::{ConflictStrategy, SyncConflict};
use medsync_storage::RecordStore;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

/// The conflict registry.
pub struct ConflictRegistry<S: RecordStore> {
    conflicts: RwLock<Vec<SyncConflict>>,
    persist_lock: Mutex<()>,
    dedupe: bool,
    persistence: Persistence<S>,
    stats: Arc<StatsTracker>,
    events: Arc<EventFeed>,
}

impl<S: RecordStore> ConflictRegistry<S> {
    /// Creates an empty registry backed by `store`.
    pub fn new(
        store: Arc<S>,
        config: &SyncConfig,
        stats: Arc<StatsTracker>,
        events: Arc<EventFeed>,
    ) -> Self {
        Self {
            conflicts: RwLock::new(Vec::new()),
            persist_lock: Mutex::new(()),
            dedupe: config.dedupe_conflicts,
            persistence: Persistence::new(store, config.persist_retry.clone(), events.clone()),
            stats,
            events,
        }
    }

    /// Replaces the in-memory registry with the persisted snapshot.
    pub fn load(&self) -> SyncResult<usize> {
        let loaded: Vec<SyncConflict> = self.persistence.load(CONFLICTS_COLLECTION)?;
        let count = loaded.len();
        *self.conflicts.write() = loaded;
        self.update_counts();
        info!(count, "conflict registry loaded");
        Ok(count)
    }

    /// Records a divergence between the local and server copy of a record.
    ///
    /// With deduplication enabled, an unresolved conflict for the same
    /// record is refreshed with the new snapshots and returned instead of
    /// creating a second one.
    pub fn register(
        &self,
        collection: &str,
        document_id: &str,
        local_data: Option<Vec<u8>>,
        server_data: Option<Vec<u8>>,
        local_timestamp: u64,
        server_timestamp: u64,
    ) -> SyncConflict {
        let conflict = {
            let mut conflicts = self.conflicts.write();
            let existing = if self.dedupe {
                conflicts
                    .iter()
                    .position(|c| !c.resolved && c.is_for(collection, document_id))
            } else {
                None
            };

            match existing {
                Some(index) => {
                    let conflict = &mut conflicts[index];
                    conflict.refresh(local_data, server_data, local_timestamp, server_timestamp);
                    debug!(id = %conflict.id, collection, document_id, "conflict refreshed");
                    conflict.clone()
                }
                None => {
                    let conflict = SyncConflict::new(
                        collection,
                        document_id,
                        local_data,
                        server_data,
                        local_timestamp,
                        server_timestamp,
                    );
                    info!(id = %conflict.id, collection, document_id, "conflict detected");
                    conflicts.push(conflict.clone());
                    conflict
                }
            }
        };

        self.persist();
        self.update_counts();
        self.events.emit(SyncEvent::ConflictDetected {
            conflict_id: conflict.id.clone(),
            collection: conflict.collection.clone(),
            document_id: conflict.document_id.clone(),
        });
        conflict
    }

    /// Resolves a conflict with a deterministic strategy.
    ///
    /// Returns false for unknown or already resolved conflicts and for
    /// [`ConflictStrategy::Manual`], which needs a human decision.
    pub fn resolve(&self, id: &str, strategy: ConflictStrategy) -> bool {
        self.update(id, |conflict| {
            match strategy.pick(conflict.local_timestamp, conflict.server_timestamp) {
                Some(resolution) => conflict.resolve(resolution),
                None => false,
            }
        })
    }

    /// Resolves a conflict with a caller-supplied merged payload.
    pub fn resolve_with_merge(&self, id: &str, merged: Option<Vec<u8>>) -> bool {
        self.update(id, |conflict| conflict.resolve_merged(merged))
    }

    /// Removes resolved conflicts and returns how many were removed.
    pub fn clear_resolved(&self) -> usize {
        let removed = {
            let mut conflicts = self.conflicts.write();
            let before = conflicts.len();
            conflicts.retain(|c| !c.resolved);
            before - conflicts.len()
        };

        if removed > 0 {
            info!(removed, "cleared resolved conflicts");
            self.persist();
            self.update_counts();
        }
        removed
    }

    /// Returns the conflict with the given id.
    pub fn get(&self, id: &str) -> Option<SyncConflict> {
        self.conflicts.read().iter().find(|c| c.id == id).cloned()
    }

    /// Returns the conflicts awaiting resolution.
    pub fn unresolved(&self) -> Vec<SyncConflict> {
        self.conflicts
            .read()
            .iter()
            .filter(|c| !c.resolved)
            .cloned()
            .collect()
    }

    /// Returns every conflict, resolved or not, in detection order.
    pub fn all(&self) -> Vec<SyncConflict> {
        self.conflicts.read().clone()
    }

    /// Returns `(resolved, unresolved)` counts.
    pub fn counts(&self) -> (usize, usize) {
        let conflicts = self.conflicts.read();
        let resolved = conflicts.iter().filter(|c| c.resolved).count();
        (resolved, conflicts.len() - resolved)
    }

    fn update<F>(&self, id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut SyncConflict) -> bool,
    {
        let resolved = {
            let mut conflicts = self.conflicts.write();
            match conflicts.iter_mut().find(|c| c.id == id) {
                Some(conflict) if !conflict.resolved => {
                    if apply(conflict) {
                        conflict.resolution
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        let Some(resolution) = resolved else {
            debug!(id, "conflict not resolved");
            return false;
        };

        info!(id, %resolution, "conflict resolved");
        self.persist();
        self.update_counts();
        self.events.emit(SyncEvent::ConflictResolved {
            conflict_id: id.to_string(),
            resolution,
        });
        true
    }

    fn update_counts(&self) {
        let (resolved, unresolved) = self.counts();
        self.stats.set_conflict_counts(resolved, unresolved);
    }

    fn persist(&self) -> bool {
        let _guard = self.persist_lock.lock();
        let snapshot = self.all();
        self.persistence.save(CONFLICTS_COLLECTION, &snapshot)
    }
}

impl<S: RecordStore> std::fmt::Debug for ConflictRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (resolved, unresolved) = self.counts();
        f.debug_struct("ConflictRegistry")
            .field("resolved", &resolved)
            .field("unresolved", &unresolved)
            .field("dedupe", &self.dedupe)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_protocol::ConflictResolution;
    use medsync_storage::InMemoryStore;

    fn registry_with(store: Arc<InMemoryStore>, dedupe: bool) -> ConflictRegistry<InMemoryStore> {
        ConflictRegistry::new(
            store,
            &SyncConfig::new().with_dedupe_conflicts(dedupe),
            Arc::new(StatsTracker::new()),
            Arc::new(EventFeed::new()),
        )
    }

    fn registry() -> ConflictRegistry<InMemoryStore> {
        registry_with(Arc::new(InMemoryStore::new()), true)
    }

    fn register(
        registry: &ConflictRegistry<InMemoryStore>,
        doc: &str,
        local: u64,
        server: u64,
    ) -> SyncConflict {
        registry.register(
            "medications",
            doc,
            Some(b"local".to_vec()),
            Some(b"server".to_vec()),
            local,
            server,
        )
    }

    #[test]
    fn newest_wins_picks_client_when_local_is_newer() {
        let registry = registry();
        let conflict = register(&registry, "med-1", 2_000, 1_000);

        assert!(registry.resolve(&conflict.id, ConflictStrategy::NewestWins));
        let resolved = registry.get(&conflict.id).unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolution, Some(ConflictResolution::Client));

        assert!(!registry.resolve(&conflict.id, ConflictStrategy::ServerWins));
        assert_eq!(
            registry.get(&conflict.id).unwrap().resolution,
            Some(ConflictResolution::Client)
        );
    }

    #[test]
    fn manual_and_unknown_are_rejected() {
        let registry = registry();
        let conflict = register(&registry, "med-1", 1, 2);

        assert!(!registry.resolve(&conflict.id, ConflictStrategy::Manual));
        assert!(!registry.resolve("missing", ConflictStrategy::ServerWins));
        assert_eq!(registry.unresolved().len(), 1);
    }

    #[test]
    fn merge_keeps_payload() {
        let registry = registry();
        let conflict = register(&registry, "med-1", 1, 2);

        assert!(registry.resolve_with_merge(&conflict.id, Some(b"merged".to_vec())));
        let resolved = registry.get(&conflict.id).unwrap();
        assert_eq!(resolved.resolution, Some(ConflictResolution::Merged));
        assert_eq!(resolved.winning_data(), Some(&b"merged"[..]));
        assert!(!registry.resolve_with_merge(&conflict.id, None));
    }

    #[test]
    fn dedupe_refreshes_unresolved() {
        let registry = registry();
        let first = register(&registry, "med-1", 1, 2);
        let second = register(&registry, "med-1", 5, 6);

        assert_eq!(first.id, second.id);
        assert_eq!(second.local_timestamp, 5);
        assert_eq!(registry.all().len(), 1);

        registry.resolve(&first.id, ConflictStrategy::ServerWins);
        let third = register(&registry, "med-1", 7, 8);
        assert_ne!(third.id, first.id);
        assert_eq!(registry.counts(), (1, 1));
    }

    #[test]
    fn history_mode_keeps_every_detection() {
        let registry = registry_with(Arc::new(InMemoryStore::new()), false);
        register(&registry, "med-1", 1, 2);
        register(&registry, "med-1", 3, 4);
        assert_eq!(registry.unresolved().len(), 2);
    }

    #[test]
    fn clear_resolved_only_removes_resolved() {
        let registry = registry();
        let a = register(&registry, "a", 1, 2);
        register(&registry, "b", 1, 2);
        registry.resolve(&a.id, ConflictStrategy::ClientWins);

        assert_eq!(registry.clear_resolved(), 1);
        assert_eq!(registry.clear_resolved(), 0);
        assert_eq!(registry.counts(), (0, 1));
    }

    #[test]
    fn load_restores_conflicts() {
        let store = Arc::new(InMemoryStore::new());
        let registry = registry_with(store.clone(), true);
        let a = register(&registry, "a", 1, 2);
        register(&registry, "b", 1, 2);
        registry.resolve(&a.id, ConflictStrategy::ServerWins);

        let reloaded = registry_with(store, true);
        assert_eq!(reloaded.load().unwrap(), 2);
        assert_eq!(reloaded.all(), registry.all());
        assert_eq!(reloaded.counts(), (1, 1));
    }
}
