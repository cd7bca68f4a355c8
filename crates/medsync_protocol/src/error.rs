//! Error types for record encoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding persisted records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a record.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// Failed to decode a record.
    #[error("decoding failed: {0}")]
    Decode(String),

    /// Record was written by a newer schema.
    #[error("unsupported record version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u16,
        /// Highest version this build understands.
        supported: u16,
    },

    /// Envelope holds a different record kind than requested.
    #[error("expected {expected} record, found {found}")]
    UnexpectedKind {
        /// Requested record kind.
        expected: &'static str,
        /// Kind found in the envelope.
        found: String,
    },

    /// A textual value could not be parsed.
    #[error("invalid {what}: {value:?}")]
    InvalidValue {
        /// What was being parsed.
        what: &'static str,
        /// The rejected input.
        value: String,
    },
}

impl ProtocolError {
    pub(crate) fn invalid(what: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            what,
            value: value.to_string(),
        }
    }
}
