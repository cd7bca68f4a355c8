//! Queue dump command implementation.

use medsync_protocol::QueuedOperation;
use serde::Serialize;
use std::path::Path;

/// Pending operation representation for output.
#[derive(Debug, Serialize)]
pub struct OperationInfo {
    /// Operation ID.
    pub id: String,
    /// Priority name.
    pub priority: String,
    /// Operation type.
    pub op_type: String,
    /// Target collection.
    pub collection: String,
    /// Target record.
    pub document_id: String,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Attempts allowed.
    pub max_retries: u32,
    /// Creation time (unix millis).
    pub timestamp: u64,
    /// Owner of the write.
    pub user_id: String,
    /// Payload size in bytes.
    pub payload_size: usize,
}

impl From<&QueuedOperation> for OperationInfo {
    fn from(op: &QueuedOperation) -> Self {
        Self {
            id: op.id.clone(),
            priority: op.priority.to_string(),
            op_type: op.op_type.to_string(),
            collection: op.collection.clone(),
            document_id: op.document_id.clone(),
            retry_count: op.retry_count,
            max_retries: op.max_retries,
            timestamp: op.timestamp,
            user_id: op.user_id.clone(),
            payload_size: op.payload_size(),
        }
    }
}

/// Runs the queue command.
pub fn run(
    path: &Path,
    collection: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (_, sync) = super::open(path)?;
    let operations = select(&sync.pending_operations(), collection, limit);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&operations)?);
        }
        _ => {
            print_text_output(&operations);
        }
    }

    Ok(())
}

fn select(
    operations: &[QueuedOperation],
    collection: Option<&str>,
    limit: Option<usize>,
) -> Vec<OperationInfo> {
    operations
        .iter()
        .filter(|op| collection.map_or(true, |c| op.collection == c))
        .take(limit.unwrap_or(usize::MAX))
        .map(OperationInfo::from)
        .collect()
}

fn print_text_output(operations: &[OperationInfo]) {
    println!("Pending Operations ({} total)", operations.len());
    println!("================");
    println!();

    for op in operations {
        println!(
            "[{:8}] {:6} {}/{} retries={}/{} size={} id={}",
            op.priority,
            op.op_type,
            op.collection,
            op.document_id,
            op.retry_count,
            op.max_retries,
            op.payload_size,
            op.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_protocol::{OperationType, Priority};

    fn op(collection: &str, doc: &str) -> QueuedOperation {
        QueuedOperation::new(
            OperationType::Create,
            collection,
            doc,
            Some(vec![0; 4]),
            Priority::Normal,
            "user-1",
        )
    }

    #[test]
    fn select_filters_and_limits() {
        let ops = vec![
            op("medications", "a"),
            op("adherence", "b"),
            op("medications", "c"),
        ];

        let meds = select(&ops, Some("medications"), None);
        assert_eq!(meds.len(), 2);
        assert_eq!(meds[1].document_id, "c");
        assert_eq!(meds[0].payload_size, 4);

        assert_eq!(select(&ops, None, Some(1)).len(), 1);
    }
}
