//! Public handle for the batch scheduler subsystem.
//!
//! [`Scheduler::start`] spawns the coordinator actor and returns a cheap
//! cloneable handle. All operations forward to the coordinator over the
//! command channel and await a oneshot reply, so callers never touch the
//! scheduling state directly.

use std::sync::Arc;
use std::time::Duration;

use fabula_core::batch::{
    validate_submission, BatchDetail, BatchSubmission, BatchSummary, RetryOutcome,
};
use fabula_core::error::CoreError;
use fabula_core::types::DbId;
use fabula_provider::ImageProvider;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::coordinator::{Command, Coordinator};
use crate::events::SchedulerEvent;
use crate::recovery::{JobStore, StoreError};
use crate::worker::WorkerPool;

// ---------------------------------------------------------------------------
// Scheduler handle
// ---------------------------------------------------------------------------

pub struct Scheduler {
    commands: mpsc::Sender<Command>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    cancel: CancellationToken,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Start the scheduler: spawn the coordinator task and return a handle.
    pub fn start(config: SchedulerConfig, provider: Arc<dyn ImageProvider>) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        let pool = WorkerPool::new(provider, internal_tx.clone(), cancel.child_token());
        let coordinator = Coordinator::new(
            config,
            pool,
            command_rx,
            internal_rx,
            internal_tx,
            event_tx.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(coordinator.run());

        Arc::new(Self {
            commands: command_tx,
            event_tx,
            cancel,
            coordinator: Mutex::new(Some(handle)),
        })
    }

    // ---- operations ----

    /// Submit a named batch of generation tasks. Validation happens here,
    /// before the submission reaches the coordinator.
    pub async fn submit_batch(&self, submission: BatchSubmission) -> Result<DbId, CoreError> {
        validate_submission(&submission)?;
        self.request(|reply| Command::Submit { submission, reply })
            .await?
    }

    /// Full status of one batch: derived batch status, progress counters,
    /// and per-task detail.
    pub async fn batch_status(&self, batch_id: DbId) -> Result<BatchDetail, CoreError> {
        self.request(|reply| Command::Status { batch_id, reply })
            .await?
    }

    /// Summaries of all known batches, ordered by id.
    pub async fn list_batches(&self) -> Result<Vec<BatchSummary>, CoreError> {
        self.request(|reply| Command::Summaries { reply }).await
    }

    /// Cancel a batch: pending tasks become Cancelled immediately, running
    /// tasks are signalled best-effort. Idempotent.
    pub async fn cancel_batch(&self, batch_id: DbId) -> Result<(), CoreError> {
        self.request(|reply| Command::Cancel { batch_id, reply })
            .await?
    }

    /// Stop admitting new tasks from a batch. Running tasks finish.
    pub async fn pause_batch(&self, batch_id: DbId) -> Result<(), CoreError> {
        self.request(|reply| Command::Pause { batch_id, reply })
            .await?
    }

    pub async fn resume_batch(&self, batch_id: DbId) -> Result<(), CoreError> {
        self.request(|reply| Command::Resume { batch_id, reply })
            .await?
    }

    /// Requeue the failed tasks of a batch for one more run each.
    /// Permanent failures are skipped and reported in the outcome.
    pub async fn retry_failed(&self, batch_id: DbId) -> Result<RetryOutcome, CoreError> {
        self.request(|reply| Command::RetryFailed { batch_id, reply })
            .await?
    }

    /// Load unfinished batches from the job store and re-admit them.
    /// Returns the number of batches restored.
    pub async fn recover(&self, store: &dyn JobStore) -> Result<usize, StoreError> {
        let batches = store.load_unfinished().await?;
        if batches.is_empty() {
            tracing::info!("No unfinished batches to recover");
            return Ok(0);
        }
        self.request(|reply| Command::Recover { batches, reply })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Subscribe to scheduler lifecycle events. Each subscriber gets an
    /// independent cursor; slow subscribers may observe lagged errors.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the coordinator and cancel all in-flight tasks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.coordinator.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!("Coordinator did not stop within 5s");
            }
        }
    }

    // ---- plumbing ----

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| CoreError::Internal("scheduler is shut down".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CoreError::Internal("scheduler dropped the request".to_string()))
    }
}
