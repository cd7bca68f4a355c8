//! Test fixtures and orchestrator helpers.
//!
//! Provides scripted executors, a recording notification sink, and a
//! harness that wires them to an orchestrator over an in-memory store.

use medsync_engine::{
    DetectedConflict, ExecutionError, ExecutionOutcome, Notification, NotificationLevel,
    NotificationSink, OperationExecutor, RetryConfig, SessionAuth, SyncConfig, SyncOrchestrator,
};
use medsync_protocol::QueuedOperation;
use medsync_storage::{FileStore, InMemoryStore, RecordStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Collections used by the application.
pub const COLLECTIONS: [&str; 4] = ["patients", "medications", "adherence", "reports"];

/// User signed in by default in the harness.
pub const TEST_USER: &str = "user-1";

/// How a [`ScriptedExecutor`] answers for a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// Accept the write.
    Apply,
    /// Fail with a transient error.
    Fail,
    /// Fail with a permanent error.
    Reject,
    /// Report a divergent server copy.
    Conflict {
        /// Server payload.
        server_data: Option<Vec<u8>>,
        /// Server modification time.
        server_timestamp: u64,
    },
}

#[derive(Debug, Default)]
struct Script {
    default: Option<Behavior>,
    per_document: HashMap<String, Behavior>,
    calls: Vec<String>,
}

/// An executor whose answers are scripted per document id.
///
/// Clones share the script and the call log, so a test can keep one
/// handle while the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<Script>>,
}

impl ScriptedExecutor {
    /// Creates an executor that applies everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the answer for documents without their own behavior.
    pub fn set_default(&self, behavior: Behavior) {
        self.script.lock().default = Some(behavior);
    }

    /// Sets the answer for one document.
    pub fn set_behavior(&self, document_id: impl Into<String>, behavior: Behavior) {
        self.script
            .lock()
            .per_document
            .insert(document_id.into(), behavior);
    }

    /// Returns the document ids executed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    /// Returns how many times `document_id` was executed.
    pub fn calls_for(&self, document_id: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|d| d.as_str() == document_id)
            .count()
    }

    /// Forgets recorded calls.
    pub fn reset_calls(&self) {
        self.script.lock().calls.clear();
    }
}

impl OperationExecutor for ScriptedExecutor {
    fn execute(&self, operation: &QueuedOperation) -> Result<ExecutionOutcome, ExecutionError> {
        let behavior = {
            let mut script = self.script.lock();
            script.calls.push(operation.document_id.clone());
            script
                .per_document
                .get(&operation.document_id)
                .or(script.default.as_ref())
                .cloned()
                .unwrap_or(Behavior::Apply)
        };

        match behavior {
            Behavior::Apply => Ok(ExecutionOutcome::Applied),
            Behavior::Fail => Err(ExecutionError::transient("scripted transient failure")),
            Behavior::Reject => Err(ExecutionError::permanent("scripted permanent failure")),
            Behavior::Conflict {
                server_data,
                server_timestamp,
            } => Ok(ExecutionOutcome::Conflict(DetectedConflict {
                local_data: operation.data.clone(),
                server_data,
                local_timestamp: operation.timestamp,
                server_timestamp,
            })),
        }
    }
}

/// A notification sink that records everything it is shown.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    received: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every notification received.
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    /// Returns how many notifications of `level` were received.
    pub fn count(&self, level: NotificationLevel) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|n| n.level == level)
            .count()
    }

    /// Forgets received notifications.
    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) {
        self.received.lock().push(notification.clone());
    }
}

/// An orchestrator over an in-memory store with a scripted executor
/// registered for every application collection.
pub struct TestSync {
    /// The orchestrator.
    pub sync: SyncOrchestrator<InMemoryStore>,
    /// Backing store, shared with reopened orchestrators.
    pub store: Arc<InMemoryStore>,
    /// Auth context.
    pub auth: Arc<SessionAuth>,
    /// Executor registered for [`COLLECTIONS`].
    pub executor: ScriptedExecutor,
    /// Sink registered on the orchestrator.
    pub sink: RecordingSink,
    config: SyncConfig,
}

impl TestSync {
    /// Starts building a harness.
    pub fn builder() -> TestSyncBuilder {
        TestSyncBuilder::default()
    }

    /// Opens a fresh orchestrator over the same store, as after a restart.
    pub fn reopen(&self, online: bool) -> SyncOrchestrator<InMemoryStore> {
        let sync = SyncOrchestrator::open(
            self.config.clone(),
            self.store.clone(),
            self.auth.clone(),
            online,
        )
        .expect("Failed to reopen orchestrator");
        register_all(&sync, &self.executor);
        sync
    }
}

impl std::ops::Deref for TestSync {
    type Target = SyncOrchestrator<InMemoryStore>;

    fn deref(&self) -> &Self::Target {
        &self.sync
    }
}

/// Builder for [`TestSync`].
#[derive(Debug)]
pub struct TestSyncBuilder {
    config: SyncConfig,
    online: bool,
    signed_in: bool,
}

impl Default for TestSyncBuilder {
    fn default() -> Self {
        Self {
            config: SyncConfig::new().with_persist_retry(RetryConfig::no_retry()),
            online: true,
            signed_in: true,
        }
    }
}

impl TestSyncBuilder {
    /// Starts offline.
    pub fn offline(mut self) -> Self {
        self.online = false;
        self
    }

    /// Starts with nobody signed in.
    pub fn anonymous(mut self) -> Self {
        self.signed_in = false;
        self
    }

    /// Sets the retry ceiling for new operations.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config = self.config.with_max_retries(max_retries);
        self
    }

    /// Enables or disables conflict deduplication.
    pub fn dedupe_conflicts(mut self, dedupe: bool) -> Self {
        self.config = self.config.with_dedupe_conflicts(dedupe);
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the harness.
    pub fn build(self) -> TestSync {
        let store = Arc::new(InMemoryStore::new());
        let auth = Arc::new(if self.signed_in {
            SessionAuth::signed_in(TEST_USER)
        } else {
            SessionAuth::anonymous()
        });

        let sync = SyncOrchestrator::open(
            self.config.clone(),
            store.clone(),
            auth.clone(),
            self.online,
        )
        .expect("Failed to open orchestrator");
        let executor = ScriptedExecutor::new();
        register_all(&sync, &executor);
        let sink = RecordingSink::new();
        sync.add_notification_sink(Arc::new(sink.clone()));

        TestSync {
            sync,
            store,
            auth,
            executor,
            sink,
            config: self.config,
        }
    }
}

fn register_all<S: RecordStore>(
    sync: &SyncOrchestrator<S>,
    executor: &ScriptedExecutor,
) {
    for collection in COLLECTIONS {
        sync.register_executor(collection, executor.clone());
    }
}

/// Creates a file store in a temporary directory.
///
/// Keep the returned [`TempDir`] alive for as long as the store is used.
pub fn temp_file_store() -> (TempDir, Arc<FileStore>) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = FileStore::open(dir.path()).expect("Failed to open file store");
    (dir, Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use medsync_protocol::{OperationType, Priority};

    #[test]
    fn scripted_executor_follows_script() {
        let executor = ScriptedExecutor::new();
        executor.set_behavior("bad", Behavior::Reject);

        let good = QueuedOperation::new(
            OperationType::Create,
            "patients",
            "good",
            None,
            Priority::Normal,
            TEST_USER,
        );
        let bad = QueuedOperation::new(
            OperationType::Create,
            "patients",
            "bad",
            None,
            Priority::Normal,
            TEST_USER,
        );

        assert_eq!(executor.execute(&good), Ok(ExecutionOutcome::Applied));
        assert!(executor.execute(&bad).unwrap_err().permanent);
        assert_eq!(executor.calls(), vec!["good", "bad"]);

        executor.set_default(Behavior::Fail);
        assert!(!executor.execute(&good).unwrap_err().permanent);
        assert_eq!(executor.calls_for("good"), 2);
    }

    #[test]
    fn harness_drains_every_collection() {
        let harness = TestSync::builder().build();
        for collection in COLLECTIONS {
            harness
                .queue_operation(
                    OperationType::Update,
                    collection,
                    "doc",
                    Some(vec![1]),
                    Priority::Normal,
                )
                .unwrap();
        }

        let report = harness.sync_now().unwrap();
        assert_eq!(report.succeeded, COLLECTIONS.len());
        assert_eq!(harness.sink.count(NotificationLevel::Success), 1);
    }
}
