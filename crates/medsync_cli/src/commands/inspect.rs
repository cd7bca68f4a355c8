//! Inspect command implementation.

use medsync_engine::{SyncOrchestrator, SyncStats, SyncStatus};
use medsync_storage::{FileStore, RecordStore};
use serde::Serialize;
use std::path::Path;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Non-empty collections in the store.
    pub collections: Vec<CollectionInfo>,
    /// Pending operations per priority, critical first.
    pub pending_by_priority: Vec<(String, usize)>,
    /// Aggregate statistics.
    pub stats: SyncStats,
}

/// Record count of a single collection.
#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Number of records.
    pub records: usize,
    /// Total encoded size in bytes.
    pub bytes: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (store, sync) = super::open(path)?;
    let result = collect(path, &store, &sync)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result, sync.status());
        }
    }

    Ok(())
}

fn collect(
    path: &Path,
    store: &FileStore,
    sync: &SyncOrchestrator<FileStore>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let mut collections = Vec::new();
    for name in store.collections()? {
        let records = store.get_all(&name)?;
        collections.push(CollectionInfo {
            bytes: records.iter().map(|r| r.bytes.len()).sum(),
            records: records.len(),
            name,
        });
    }

    let mut pending_by_priority: Vec<(String, usize)> = Vec::new();
    for op in sync.pending_operations() {
        let name = op.priority.as_str();
        if let Some((last, count)) = pending_by_priority.last_mut() {
            if last == name {
                *count += 1;
                continue;
            }
        }
        pending_by_priority.push((name.to_string(), 1));
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        collections,
        pending_by_priority,
        stats: sync.stats(),
    })
}

fn print_text_output(result: &InspectResult, status: SyncStatus) {
    println!("MedSync Store: {}", result.path);
    println!("================");
    println!("Status (offline view): {}", status);
    println!();

    println!("Collections:");
    if result.collections.is_empty() {
        println!("  (empty)");
    }
    for c in &result.collections {
        println!("  {:<16} {:>6} records {:>10} bytes", c.name, c.records, c.bytes);
    }
    println!();

    let stats = &result.stats;
    println!("Pending operations:   {}", stats.pending_operations);
    for (priority, count) in &result.pending_by_priority {
        println!("  {:<10} {}", priority, count);
    }
    println!("Successful syncs:     {}", stats.successful_syncs);
    println!("Failed syncs:         {}", stats.failed_syncs);
    println!("Conflicted ops:       {}", stats.conflicted_operations);
    println!("Resolved conflicts:   {}", stats.resolved_conflicts);
    println!("Unresolved conflicts: {}", stats.unresolved_conflicts);
    println!("Last sync:            {}", super::format_millis(stats.last_sync_time));
    if let Some(err) = &stats.last_error {
        println!("Last error:           {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_engine::{OperationType, Priority, SessionAuth, SyncConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn collect_groups_pending_by_priority() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path()).unwrap());
        let sync = SyncOrchestrator::open(
            SyncConfig::default(),
            store.clone(),
            Arc::new(SessionAuth::signed_in("user-1")),
            false,
        )
        .unwrap();
        for (doc, priority) in [
            ("a", Priority::Low),
            ("b", Priority::Critical),
            ("c", Priority::Low),
        ] {
            sync.queue_operation(
                OperationType::Update,
                "medications",
                doc,
                Some(vec![1]),
                priority,
            )
            .unwrap();
        }

        let result = collect(dir.path(), &store, &sync).unwrap();
        assert_eq!(
            result.pending_by_priority,
            vec![("critical".to_string(), 1), ("low".to_string(), 2)]
        );
        assert_eq!(result.stats.pending_operations, 3);
        assert_eq!(result.collections.len(), 1);
        assert_eq!(result.collections[0].name, "sync_queue");
        assert_eq!(result.collections[0].records, 3);
    }
}
