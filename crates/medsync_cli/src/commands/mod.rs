//! CLI command implementations.

pub mod cancel;
pub mod conflicts;
pub mod inspect;
pub mod queue;

use medsync_engine::{SessionAuth, SyncConfig, SyncOrchestrator};
use medsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// An orchestrator opened over a store directory.
pub type Opened = (Arc<FileStore>, SyncOrchestrator<FileStore>);

/// Opens the orchestrator over an existing store directory.
///
/// The CLI never queues writes or drains, so it opens offline with no
/// signed-in user.
pub fn open(path: &Path) -> Result<Opened, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No sync store found at {:?}", path).into());
    }
    debug!(path = %path.display(), "opening sync store");
    let store = Arc::new(FileStore::open(path)?);
    let sync = SyncOrchestrator::open(
        SyncConfig::default(),
        store.clone(),
        Arc::new(SessionAuth::anonymous()),
        false,
    )?;
    Ok((store, sync))
}

/// Formats optional unix millis for text output.
pub fn format_millis(millis: Option<u64>) -> String {
    millis
        .map(|m| m.to_string())
        .unwrap_or_else(|| "never".to_string())
}
