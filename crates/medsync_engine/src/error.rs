//! Error types for the sync engine.

use medsync_protocol::ProtocolError;
use medsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No user is signed in; the caller must re-authenticate.
    #[error("authentication required to queue operations")]
    AuthenticationRequired,

    /// An operation failed on every allowed attempt and was dropped.
    #[error("operation {operation_id} dropped after {attempts} failed attempts")]
    RetriesExhausted {
        /// Dropped operation ID.
        operation_id: String,
        /// Number of failed attempts.
        attempts: u32,
    },

    /// A forced sync was requested while disconnected.
    #[error("cannot sync while offline")]
    CannotSyncOffline,

    /// A sync pass is already running.
    #[error("a sync pass is already in progress")]
    SyncInProgress,

    /// Record store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Record encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SyncError {
    /// Returns true if the same call may succeed later without any
    /// change by the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::SyncInProgress => true,
            SyncError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::SyncInProgress.is_retryable());
        assert!(!SyncError::AuthenticationRequired.is_retryable());
        assert!(!SyncError::CannotSyncOffline.is_retryable());
        assert!(!SyncError::Storage(StorageError::Locked).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::RetriesExhausted {
            operation_id: "1700-abc".into(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "operation 1700-abc dropped after 3 failed attempts"
        );
        assert_eq!(
            SyncError::CannotSyncOffline.to_string(),
            "cannot sync while offline"
        );
    }
}
