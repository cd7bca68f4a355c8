//! Conflict commands implementation.

use medsync_protocol::{ConflictStrategy, SyncConflict};
use serde::Serialize;
use std::path::Path;

/// Conflict representation for output.
#[derive(Debug, Serialize)]
pub struct ConflictInfo {
    /// Conflict ID.
    pub id: String,
    /// Target collection.
    pub collection: String,
    /// Target record.
    pub document_id: String,
    /// Local modification time (unix millis).
    pub local_timestamp: u64,
    /// Server modification time (unix millis).
    pub server_timestamp: u64,
    /// Detection time (unix millis).
    pub detected_at: u64,
    /// Recorded resolution, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Local payload size in bytes.
    pub local_size: usize,
    /// Server payload size in bytes.
    pub server_size: usize,
}

impl From<&SyncConflict> for ConflictInfo {
    fn from(c: &SyncConflict) -> Self {
        Self {
            id: c.id.clone(),
            collection: c.collection.clone(),
            document_id: c.document_id.clone(),
            local_timestamp: c.local_timestamp,
            server_timestamp: c.server_timestamp,
            detected_at: c.detected_at,
            resolution: c.resolution.map(|r| r.to_string()),
            local_size: c.local_data.as_ref().map_or(0, Vec::len),
            server_size: c.server_data.as_ref().map_or(0, Vec::len),
        }
    }
}

/// Runs `conflicts list`.
pub fn list(path: &Path, all: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (_, sync) = super::open(path)?;
    let conflicts = if all {
        sync.conflicts().all()
    } else {
        sync.unresolved_conflicts()
    };
    let infos: Vec<ConflictInfo> = conflicts.iter().map(ConflictInfo::from).collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
        _ => {
            println!("Conflicts ({} total)", infos.len());
            println!("================");
            println!();
            for c in &infos {
                let newer = if c.local_timestamp > c.server_timestamp {
                    "local newer"
                } else {
                    "server newer"
                };
                println!(
                    "{} {}/{} ({}) {}",
                    c.id,
                    c.collection,
                    c.document_id,
                    newer,
                    c.resolution.as_deref().unwrap_or("unresolved")
                );
            }
        }
    }

    Ok(())
}

/// Runs `conflicts resolve`.
pub fn resolve(path: &Path, id: &str, strategy: &str) -> Result<(), Box<dyn std::error::Error>> {
    let strategy: ConflictStrategy = strategy.parse()?;
    if strategy == ConflictStrategy::Manual {
        return Err("Manual resolution cannot be applied from the CLI".into());
    }

    let (_, sync) = super::open(path)?;
    let Some(conflict) = sync.conflict(id) else {
        return Err(format!("No conflict with id {id}").into());
    };
    if conflict.resolved {
        return Err(format!("Conflict {id} is already resolved").into());
    }
    if !sync.resolve_conflict(id, strategy) {
        return Err(format!("Conflict {id} could not be resolved").into());
    }

    let resolution = sync
        .conflict(id)
        .and_then(|c| c.resolution)
        .map(|r| r.to_string())
        .unwrap_or_default();
    println!("Resolved {id}: {resolution}");
    Ok(())
}

/// Runs `conflicts clear`.
pub fn clear(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (_, sync) = super::open(path)?;
    let removed = sync.clear_resolved_conflicts();
    println!("Removed {removed} resolved conflict(s)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_engine::ConflictResolution;
    use tempfile::tempdir;

    fn seed(path: &Path) -> String {
        let (_, sync) = crate::commands::open(path).unwrap();
        sync.register_conflict(
            "medications",
            "med-1",
            Some(vec![1, 2]),
            Some(vec![3]),
            10,
            20,
        )
        .id
    }

    #[test]
    fn resolve_then_clear() {
        let dir = tempdir().unwrap();
        let id = seed(dir.path());

        resolve(dir.path(), &id, "newest-wins").unwrap();
        assert!(resolve(dir.path(), &id, "client-wins").is_err());

        {
            let (_, sync) = crate::commands::open(dir.path()).unwrap();
            assert_eq!(
                sync.conflict(&id).unwrap().resolution,
                Some(ConflictResolution::Server)
            );
        }

        clear(dir.path()).unwrap();
        let (_, sync) = crate::commands::open(dir.path()).unwrap();
        assert!(sync.conflicts().all().is_empty());
    }

    #[test]
    fn resolve_rejects_bad_input() {
        let dir = tempdir().unwrap();
        let id = seed(dir.path());

        assert!(resolve(dir.path(), &id, "manual").is_err());
        assert!(resolve(dir.path(), &id, "coin-flip").is_err());
        assert!(resolve(dir.path(), "missing", "server-wins").is_err());
    }

    #[test]
    fn info_reports_sizes() {
        let conflict = SyncConflict::new("patients", "p-1", Some(vec![0; 3]), None, 1, 2);
        let info = ConflictInfo::from(&conflict);
        assert_eq!(info.local_size, 3);
        assert_eq!(info.server_size, 0);
        assert!(info.resolution.is_none());
    }
}
