//! Bridge from a platform connectivity signal to the orchestrator.
//!
//! The platform publishes reachability on a `tokio::sync::watch` channel;
//! the listener forwards every change to
//! [`SyncOrchestrator::connectivity_lost`] or
//! [`SyncOrchestrator::connectivity_restored`]. Handlers run on the blocking
//! pool because a reconnect may drain the queue through synchronous
//! executors.

use crate::orchestrator::SyncOrchestrator;
use medsync_storage::RecordStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawns a task that applies connectivity changes to `orchestrator`.
///
/// The current value of the channel is applied immediately. The task
/// ends when the sender is dropped.
pub fn spawn_listener<S>(
    orchestrator: Arc<SyncOrchestrator<S>>,
    mut connectivity: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: RecordStore + 'static,
{
    tokio::spawn(async move {
        loop {
            let online = *connectivity.borrow_and_update();
            let target = orchestrator.clone();
            let handled = tokio::task::spawn_blocking(move || {
                if online {
                    if let Some(report) = target.connectivity_restored() {
                        debug!(succeeded = report.succeeded, "reconnect drain finished");
                    }
                } else {
                    target.connectivity_lost();
                }
            })
            .await;

            if let Err(e) = handled {
                warn!(error = %e, "connectivity handler failed");
            }

            if connectivity.changed().await.is_err() {
                debug!("connectivity source closed");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionAuth;
    use crate::config::SyncConfig;
    use crate::state::SyncStatus;
    use medsync_storage::InMemoryStore;

    #[tokio::test]
    async fn listener_applies_initial_value_and_exits_on_close() {
        let sync = Arc::new(
            SyncOrchestrator::open(
                SyncConfig::default(),
                Arc::new(InMemoryStore::new()),
                Arc::new(SessionAuth::signed_in("user-1")),
                true,
            )
            .unwrap(),
        );

        let (tx, rx) = watch::channel(false);
        let handle = spawn_listener(sync.clone(), rx);
        drop(tx);
        handle.await.unwrap();

        assert!(!sync.connectivity());
        assert_eq!(sync.status(), SyncStatus::Offline);
    }
}
