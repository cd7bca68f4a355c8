//! Orchestrator status.

use std::fmt;

/// Current status of the sync orchestrator.
///
/// ```text
/// Offline <──> Online ──> Syncing ──> Online
///                            │
///                            └──────> Error ──> Syncing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Connected and idle.
    #[default]
    Online,
    /// No connectivity; writes are queued.
    Offline,
    /// A drain pass is running.
    Syncing,
    /// The last pass left operations waiting for retry.
    Error,
}

impl SyncStatus {
    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Online => "online",
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Error => "error",
        }
    }

    /// Returns true if a drain pass may start from this status.
    pub fn can_sync(&self) -> bool {
        matches!(self, SyncStatus::Online | SyncStatus::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_sync() {
        assert!(SyncStatus::Online.can_sync());
        assert!(SyncStatus::Error.can_sync());
        assert!(!SyncStatus::Offline.can_sync());
        assert!(!SyncStatus::Syncing.can_sync());
    }

    #[test]
    fn display() {
        assert_eq!(SyncStatus::Syncing.to_string(), "syncing");
    }
}
