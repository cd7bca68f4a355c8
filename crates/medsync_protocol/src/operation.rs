//! Queued write operations.

use crate::envelope::Persisted;
use crate::error::ProtocolError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Retry ceiling applied when the caller does not configure one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const ID_SUFFIX_LEN: usize = 9;

/// Kind of write carried by a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Record is created remotely.
    Create,
    /// Record is updated remotely.
    Update,
    /// Record is deleted remotely.
    Delete,
}

impl OperationType {
    /// Returns the lowercase name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(ProtocolError::invalid("operation type", other)),
        }
    }
}

/// Processing priority of a queued operation.
///
/// Variants are declared in processing order, so the derived `Ord`
/// sorts `Critical` first and `Low` last.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Must go out before anything else (e.g. a dose taken).
    Critical,
    /// Ahead of routine writes.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// Background writes.
    Low,
}

impl Priority {
    /// Returns the sort ordinal: critical=0 through low=3.
    pub fn ordinal(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(ProtocolError::invalid("priority", other)),
        }
    }
}

/// A pending write waiting for the network.
///
/// `QueuedOperation` is created when the application mutates a record,
/// persisted immediately, and destroyed either when a remote executor
/// applies it or when it runs out of retries.
///
/// # Fields
///
/// - `id`: `<millis>-<random suffix>`, immutable
/// - `retry_count`: failed attempts so far
/// - `max_retries`: ceiling fixed at enqueue time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique operation ID.
    pub id: String,
    /// Kind of write.
    pub op_type: OperationType,
    /// Target collection (e.g. "medications").
    pub collection: String,
    /// Target record within the collection.
    pub document_id: String,
    /// New or changed record content; `None` for deletes.
    pub data: Option<Vec<u8>>,
    /// Creation time in unix milliseconds.
    pub timestamp: u64,
    /// Number of failed execution attempts.
    pub retry_count: u32,
    /// Attempts allowed before the operation is dropped.
    pub max_retries: u32,
    /// Processing priority.
    pub priority: Priority,
    /// Owner of the write.
    pub user_id: String,
}

impl QueuedOperation {
    /// Creates a new operation stamped with the current time.
    pub fn new(
        op_type: OperationType,
        collection: impl Into<String>,
        document_id: impl Into<String>,
        data: Option<Vec<u8>>,
        priority: Priority,
        user_id: impl Into<String>,
    ) -> Self {
        let timestamp = unix_millis();
        let data = match op_type {
            OperationType::Delete => None,
            _ => data,
        };
        Self {
            id: generate_operation_id(timestamp),
            op_type,
            collection: collection.into(),
            document_id: document_id.into(),
            data,
            timestamp,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            priority,
            user_id: user_id.into(),
        }
    }

    /// Sets the retry ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Records a failed attempt and returns true if the ceiling is reached.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.is_exhausted()
    }

    /// Returns true if no attempts remain.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Returns the size of the payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.data.as_ref().map(|d| d.len()).unwrap_or(0)
    }
}

impl Persisted for QueuedOperation {
    const KIND: &'static str = "queued_operation";

    fn key(&self) -> &str {
        &self.id
    }
}

/// Generates an operation id from a timestamp and a random suffix.
pub fn generate_operation_id(timestamp: u64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{timestamp}-{suffix}")
}

/// Current time in unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Priority::Critical.ordinal(), 0);
        assert_eq!(Priority::Low.ordinal(), 3);
    }

    #[test]
    fn parse_names() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!(
            "delete".parse::<OperationType>().unwrap(),
            OperationType::Delete
        );
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::Low.to_string(), "low");
    }

    #[test]
    fn operation_id_format() {
        let id = generate_operation_id(1_700_000_000_000);
        let (millis, suffix) = id.split_once('-').unwrap();
        assert_eq!(millis, "1700000000000");
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

        assert_ne!(generate_operation_id(1), generate_operation_id(1));
    }

    #[test]
    fn delete_drops_payload() {
        let op = QueuedOperation::new(
            OperationType::Delete,
            "medications",
            "med-1",
            Some(vec![1, 2, 3]),
            Priority::Normal,
            "user-1",
        );
        assert_eq!(op.data, None);
        assert_eq!(op.payload_size(), 0);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn retry_ceiling() {
        let mut op = QueuedOperation::new(
            OperationType::Update,
            "medications",
            "med-1",
            Some(vec![1]),
            Priority::High,
            "user-1",
        )
        .with_max_retries(2);

        assert!(!op.record_failure());
        assert!(op.record_failure());
        assert!(op.is_exhausted());
        assert_eq!(op.retry_count, 2);
    }
}
