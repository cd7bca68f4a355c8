//! Executors apply queued operations to the remote backend.
//!
//! The engine does not own a transport. Each feature registers an
//! [`OperationExecutor`] for the collections it syncs, and the
//! [`ExecutorRegistry`] routes every queued operation to its handler.

use medsync_protocol::{OperationType, QueuedOperation};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Divergence reported by an executor.
///
/// The collection and document come from the operation being executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedConflict {
    /// Local version of the record.
    pub local_data: Option<Vec<u8>>,
    /// Version currently held by the server.
    pub server_data: Option<Vec<u8>>,
    /// Local modification time (unix millis).
    pub local_timestamp: u64,
    /// Server modification time (unix millis).
    pub server_timestamp: u64,
}

/// Successful result of executing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The remote system accepted the write.
    Applied,
    /// The remote version diverged; the write was not applied.
    Conflict(DetectedConflict),
    /// No handler could take the operation; it stays queued untouched.
    Skipped,
}

/// Failure reported by an executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExecutionError {
    /// Error message.
    pub message: String,
    /// Permanent failures are not retried.
    pub permanent: bool,
}

impl ExecutionError {
    /// A failure worth retrying (network, 5xx, timeouts).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    /// A failure that will never succeed (validation, 4xx).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

/// Applies a queued operation to the remote system.
pub trait OperationExecutor: Send + Sync {
    /// Executes a single operation.
    fn execute(&self, operation: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError>;
}

impl<F> OperationExecutor for F
where
    F: Fn(&QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> + Send + Sync,
{
    fn execute(&self, operation: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        self(operation)
    }
}

type Handler = Arc<dyn OperationExecutor>;

/// Routes operations to executors by collection and operation type.
///
/// A handler registered for `(collection, op_type)` takes precedence over
/// one registered for the whole collection.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    handlers: HashMap<(String, Option<OperationType>), Handler>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for every operation on `collection`.
    pub fn register<E>(&mut self, collection: impl Into<String>, executor: E)
    where
        E: OperationExecutor + 'static,
    {
        self.handlers
            .insert((collection.into(), None), Arc::new(executor));
    }

    /// Registers a handler for one operation type on `collection`.
    pub fn register_for<E>(
        &mut self,
        collection: impl Into<String>,
        op_type: OperationType,
        executor: E,
    ) where
        E: OperationExecutor + 'static,
    {
        self.handlers
            .insert((collection.into(), Some(op_type)), Arc::new(executor));
    }

    /// Returns the handler for an operation, if any.
    pub fn handler_for(&self, operation: &QueuedOperation) -> Option<&Handler> {
        self.handlers
            .get(&(operation.collection.clone(), Some(operation.op_type)))
            .or_else(|| self.handlers.get(&(operation.collection.clone(), None)))
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("ExecutorRegistry")
            .field("handlers", &keys)
            .finish()
    }
}

impl OperationExecutor for ExecutorRegistry {
    fn execute(&self, operation: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        match self.handler_for(operation) {
            Some(handler) => handler.execute(operation),
            None => Ok(ExecutionOutcome::Skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_protocol::Priority;

    fn applied(_: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        Ok(ExecutionOutcome::Applied)
    }

    fn read_only(_: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        Err(ExecutionError::permanent("read-only"))
    }

    fn op(collection: &str, op_type: OperationType) -> QueuedOperation {
        QueuedOperation::new(op_type, collection, "doc-1", None, Priority::Normal, "user-1")
    }

    #[test]
    fn specific_handler_wins() {
        let mut registry = ExecutorRegistry::new();
        registry.register("medications", applied);
        registry.register_for("medications", OperationType::Delete, read_only);
        assert_eq!(registry.len(), 2);

        let update = registry.execute(&op("medications", OperationType::Update));
        assert_eq!(update, Ok(ExecutionOutcome::Applied));

        let delete = registry.execute(&op("medications", OperationType::Delete));
        assert_eq!(delete, Err(ExecutionError::permanent("read-only")));
    }

    #[test]
    fn unknown_collection_is_skipped() {
        let registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        let outcome = registry.execute(&op("adherence", OperationType::Create));
        assert_eq!(outcome, Ok(ExecutionOutcome::Skipped));
    }

    #[test]
    fn execution_error_kinds() {
        assert!(!ExecutionError::transient("timeout").permanent);
        assert!(ExecutionError::permanent("400").permanent);
        assert_eq!(ExecutionError::transient("timeout").to_string(), "timeout");
    }
}
