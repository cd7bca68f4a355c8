//! Error types for record store operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A collection file could not be decoded.
    #[error("collection '{collection}' corrupted: {message}")]
    Corrupted {
        /// Collection whose file failed to decode.
        collection: String,
        /// Decoder message.
        message: String,
    },

    /// A collection could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Another process holds the store directory lock.
    #[error("store directory is locked by another process")]
    Locked,

    /// Collection name is empty or contains unsupported characters.
    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    /// Write failure injected by a test store.
    #[error("injected write failure on collection '{0}'")]
    Injected(String),
}

impl StorageError {
    pub(crate) fn corrupted(collection: &str, message: impl Into<String>) -> Self {
        Self::Corrupted {
            collection: collection.to_string(),
            message: message.into(),
        }
    }
}
