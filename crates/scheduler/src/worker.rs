//! Worker pool: the execution substrate for admitted tasks.
//!
//! The pool makes no scheduling decisions. For each task handed to it by
//! the coordinator it spawns one Tokio task that races the provider call
//! against the per-task timeout and a cancellation token, then posts
//! exactly one [`CompletionEvent`] back on the coordinator's internal
//! channel. The only shared state is an in-flight map of cancellation
//! tokens, used purely for cancellation lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fabula_core::types::DbId;
use fabula_provider::{ImageProvider, ProviderError};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::InternalEvent;

/// Terminal outcome of one task run.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Succeeded(serde_json::Value),
    Failed(ProviderError),
    Cancelled,
}

/// Posted to the coordinator when a task run finishes, whichever way.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub task_id: DbId,
    pub outcome: TaskOutcome,
}

/// Executes tasks against the provider on parallel Tokio tasks.
pub struct WorkerPool {
    provider: Arc<dyn ImageProvider>,
    events: mpsc::UnboundedSender<InternalEvent>,
    /// In-flight cancellation tokens by task id. Lookup-only; each worker
    /// removes its own entry on completion.
    in_flight: Arc<Mutex<HashMap<DbId, CancellationToken>>>,
    /// Master token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        events: mpsc::UnboundedSender<InternalEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            events,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            cancel,
        }
    }

    /// Execute one task run. A fresh client id is attached to the provider
    /// submission so retries are distinguishable on the provider side.
    pub async fn spawn(&self, task_id: DbId, payload: serde_json::Value, timeout: Duration) {
        let token = self.cancel.child_token();
        self.in_flight.lock().await.insert(task_id, token.clone());

        let provider = Arc::clone(&self.provider);
        let in_flight = Arc::clone(&self.in_flight);
        let events = self.events.clone();

        tokio::spawn(async move {
            let client_id = Uuid::new_v4();
            let outcome = tokio::select! {
                // Checked first so a fired token always reads as Cancelled,
                // not as whatever error the provider maps cancellation to.
                biased;
                _ = token.cancelled() => TaskOutcome::Cancelled,
                result = tokio::time::timeout(
                    timeout,
                    provider.generate(&payload, client_id, token.clone()),
                ) => match result {
                    Ok(Ok(output)) => TaskOutcome::Succeeded(output),
                    Ok(Err(e)) => TaskOutcome::Failed(e),
                    Err(_) => TaskOutcome::Failed(ProviderError::Transient(format!(
                        "task timed out after {}s",
                        timeout.as_secs_f64()
                    ))),
                },
            };

            in_flight.lock().await.remove(&task_id);

            // The coordinator may already be gone during shutdown.
            let _ = events.send(InternalEvent::TaskFinished(CompletionEvent {
                task_id,
                outcome,
            }));
        });
    }

    /// Fire the cancellation token of an in-flight task, if any.
    ///
    /// Best-effort: the run's eventual outcome is whatever the race in the
    /// worker resolves to.
    pub async fn cancel(&self, task_id: DbId) {
        if let Some(token) = self.in_flight.lock().await.get(&task_id) {
            tracing::debug!(task_id, "Cancelling in-flight task");
            token.cancel();
        }
    }

    /// Number of runs currently in flight. Used by shutdown logging.
    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Cancel every in-flight run (via the master token).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use fabula_provider::StubProvider;

    fn pool_with_stub(
        latency: Duration,
    ) -> (WorkerPool, mpsc::UnboundedReceiver<InternalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::new(
            Arc::new(StubProvider::new(latency)),
            tx,
            CancellationToken::new(),
        );
        (pool, rx)
    }

    #[tokio::test]
    async fn completion_event_is_posted_on_success() {
        let (pool, mut rx) = pool_with_stub(Duration::from_millis(1));
        pool.spawn(7, serde_json::json!({"prompt": "a"}), Duration::from_secs(5))
            .await;

        let event = rx.recv().await.expect("completion should arrive");
        let InternalEvent::TaskFinished(completion) = event else {
            panic!("expected a completion event");
        };
        assert_eq!(completion.task_id, 7);
        assert_matches!(completion.outcome, TaskOutcome::Succeeded(_));
        assert_eq!(pool.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_transient_failure() {
        let (pool, mut rx) = pool_with_stub(Duration::from_secs(60));
        pool.spawn(1, serde_json::json!({}), Duration::from_millis(10))
            .await;

        let InternalEvent::TaskFinished(completion) = rx.recv().await.unwrap() else {
            panic!("expected a completion event");
        };
        assert_matches!(
            completion.outcome,
            TaskOutcome::Failed(ProviderError::Transient(_))
        );
    }

    #[tokio::test]
    async fn cancel_resolves_the_run_as_cancelled() {
        let (pool, mut rx) = pool_with_stub(Duration::from_secs(60));
        pool.spawn(3, serde_json::json!({}), Duration::from_secs(60))
            .await;
        pool.cancel(3).await;

        let InternalEvent::TaskFinished(completion) = rx.recv().await.unwrap() else {
            panic!("expected a completion event");
        };
        assert_eq!(completion.task_id, 3);
        assert_matches!(completion.outcome, TaskOutcome::Cancelled);
    }

    #[tokio::test]
    async fn shutdown_cancels_all_in_flight_runs() {
        let (pool, mut rx) = pool_with_stub(Duration::from_secs(60));
        pool.spawn(1, serde_json::json!({}), Duration::from_secs(60))
            .await;
        pool.spawn(2, serde_json::json!({}), Duration::from_secs(60))
            .await;
        pool.shutdown();

        for _ in 0..2 {
            let InternalEvent::TaskFinished(completion) = rx.recv().await.unwrap() else {
                panic!("expected a completion event");
            };
            assert_matches!(completion.outcome, TaskOutcome::Cancelled);
        }
    }
}
