//! The scheduling coordinator: a single task owning all mutable state.
//!
//! The coordinator is the only component allowed to move a task from
//! Pending to Running and the only writer of the running counters. It
//! consumes two channels serially -- public commands (each carrying a
//! oneshot reply) and internal events (worker completions, retry timers,
//! cooldown expiries) -- so every state mutation is sequential and
//! race-free by construction. Its tick logic is synchronous and
//! non-blocking; the only suspension point in the subsystem is the
//! provider call inside a worker.

use std::collections::HashSet;

use fabula_core::batch::{
    BatchDetail, BatchSubmission, BatchSummary, RetryOutcome, TaskError,
};
use fabula_core::error::CoreError;
use fabula_core::retry::{decide, FailureKind, RetryDecision};
use fabula_core::status::{derive_batch_status, TaskStatus};
use fabula_core::types::DbId;
use fabula_provider::ProviderError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::events::SchedulerEvent;
use crate::recovery::{restore, PersistedBatch};
use crate::registry::BatchRegistry;
use crate::worker::{CompletionEvent, TaskOutcome, WorkerPool};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Public operations, sent by the [`crate::Scheduler`] handle.
pub enum Command {
    Submit {
        submission: BatchSubmission,
        reply: oneshot::Sender<Result<DbId, CoreError>>,
    },
    Status {
        batch_id: DbId,
        reply: oneshot::Sender<Result<BatchDetail, CoreError>>,
    },
    Summaries {
        reply: oneshot::Sender<Vec<BatchSummary>>,
    },
    Cancel {
        batch_id: DbId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Pause {
        batch_id: DbId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Resume {
        batch_id: DbId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    RetryFailed {
        batch_id: DbId,
        reply: oneshot::Sender<Result<RetryOutcome, CoreError>>,
    },
    Recover {
        batches: Vec<PersistedBatch>,
        reply: oneshot::Sender<usize>,
    },
}

/// Internal events: worker completions and timer expiries.
pub enum InternalEvent {
    TaskFinished(CompletionEvent),
    /// A transient-failure backoff elapsed; the task is admissible again.
    RetryDue { task_id: DbId },
    /// A credential's rate-limit cooldown window elapsed.
    CooldownOver { credential: String },
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    config: SchedulerConfig,
    registry: BatchRegistry,
    pool: WorkerPool,
    commands: mpsc::Receiver<Command>,
    internal: mpsc::UnboundedReceiver<InternalEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    event_tx: broadcast::Sender<SchedulerEvent>,
    cancel: CancellationToken,

    /// Tasks currently dispatched, across all batches.
    global_running: usize,
    /// Pending tasks waiting out a retry backoff; skipped by admission.
    deferred: HashSet<DbId>,
    /// Credentials inside a rate-limit cooldown window.
    cooling: HashSet<String>,
    /// Batches whose terminal status has already been announced.
    finished_announced: HashSet<DbId>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        pool: WorkerPool,
        commands: mpsc::Receiver<Command>,
        internal: mpsc::UnboundedReceiver<InternalEvent>,
        internal_tx: mpsc::UnboundedSender<InternalEvent>,
        event_tx: broadcast::Sender<SchedulerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry: BatchRegistry::new(),
            pool,
            commands,
            internal,
            internal_tx,
            event_tx,
            cancel,
            global_running: 0,
            deferred: HashSet::new(),
            cooling: HashSet::new(),
            finished_announced: HashSet::new(),
        }
    }

    /// Run the coordinator loop until the cancellation token is triggered.
    pub async fn run(mut self) {
        tracing::info!(
            global_limit = self.config.global_limit,
            task_timeout_secs = self.config.task_timeout.as_secs(),
            "Scheduler coordinator started",
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Scheduler coordinator shutting down");
                    break;
                }
                Some(event) = self.internal.recv() => {
                    self.handle_internal(event).await;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            tracing::info!("Command channel closed; coordinator stopping");
                            break;
                        }
                    }
                }
            }
        }

        let in_flight = self.pool.in_flight_count().await;
        if in_flight > 0 {
            tracing::info!(in_flight, "Cancelling in-flight tasks");
        }
        self.pool.shutdown();
    }

    // ---- command handling ----

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { submission, reply } => {
                let batch_id = self.registry.create(submission, chrono::Utc::now());
                let task_count = self
                    .registry
                    .batch(batch_id)
                    .map(|entry| entry.tasks.len())
                    .unwrap_or(0);
                tracing::info!(batch_id, task_count, "Batch submitted");
                self.publish(SchedulerEvent::BatchSubmitted {
                    batch_id,
                    task_count,
                });
                let _ = reply.send(Ok(batch_id));
                self.tick().await;
            }

            Command::Status { batch_id, reply } => {
                let _ = reply.send(self.registry.detail(batch_id));
            }

            Command::Summaries { reply } => {
                let _ = reply.send(self.registry.summaries());
            }

            Command::Cancel { batch_id, reply } => {
                let result = self.cancel_batch(batch_id).await;
                let _ = reply.send(result);
            }

            Command::Pause { batch_id, reply } => {
                let _ = reply.send(self.pause_batch(batch_id));
            }

            Command::Resume { batch_id, reply } => {
                let result = self.resume_batch(batch_id);
                let _ = reply.send(result);
                self.tick().await;
            }

            Command::RetryFailed { batch_id, reply } => {
                let result = self.retry_failed_tasks(batch_id);
                let _ = reply.send(result);
                self.tick().await;
            }

            Command::Recover { batches, reply } => {
                let mut count = 0;
                for persisted in batches {
                    let (batch, tasks) = restore(persisted);
                    tracing::info!(
                        batch_id = batch.id,
                        task_count = tasks.len(),
                        "Recovered batch from job store",
                    );
                    self.registry.insert_recovered(batch, tasks);
                    count += 1;
                }
                let _ = reply.send(count);
                self.tick().await;
            }
        }
    }

    async fn cancel_batch(&mut self, batch_id: DbId) -> Result<(), CoreError> {
        let entry = self
            .registry
            .batch(batch_id)
            .ok_or_else(|| CoreError::batch_not_found(batch_id))?;

        // Idempotent: a second cancel still acks.
        if entry.batch.cancel_requested {
            return Ok(());
        }

        // A batch that already settled (Completed, Failed, PartiallyFailed)
        // keeps its status; cancel acks without mutating anything.
        let status = derive_batch_status(
            &entry.counters,
            entry.batch.paused,
            entry.batch.cancel_requested,
        );
        if status.is_terminal() {
            return Ok(());
        }

        let pending: Vec<DbId> = entry
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id)
            .collect();
        let running: Vec<DbId> = entry
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id)
            .collect();

        if let Some(entry) = self.registry.batch_mut(batch_id) {
            entry.batch.cancel_requested = true;
        }

        for task_id in pending {
            self.deferred.remove(&task_id);
            if let Err(e) = self.registry.set_task_status(task_id, TaskStatus::Cancelled) {
                tracing::error!(task_id, error = %e, "Failed to cancel pending task");
                continue;
            }
            self.publish(SchedulerEvent::TaskCancelled { batch_id, task_id });
        }

        // Best-effort: running tasks get the token fired; their eventual
        // outcome is accepted whichever way it resolves.
        for task_id in running {
            self.pool.cancel(task_id).await;
        }

        tracing::info!(batch_id, "Batch cancelled");
        self.publish(SchedulerEvent::BatchCancelled { batch_id });
        self.check_batch_finished(batch_id);
        Ok(())
    }

    fn pause_batch(&mut self, batch_id: DbId) -> Result<(), CoreError> {
        let entry = self
            .registry
            .batch_mut(batch_id)
            .ok_or_else(|| CoreError::batch_not_found(batch_id))?;
        let status = derive_batch_status(
            &entry.counters,
            entry.batch.paused,
            entry.batch.cancel_requested,
        );
        if status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "Cannot pause batch {batch_id} in terminal status {}",
                status.label()
            )));
        }
        entry.batch.paused = true;
        tracing::info!(batch_id, "Batch paused");
        self.publish(SchedulerEvent::BatchPaused { batch_id });
        Ok(())
    }

    fn resume_batch(&mut self, batch_id: DbId) -> Result<(), CoreError> {
        let entry = self
            .registry
            .batch_mut(batch_id)
            .ok_or_else(|| CoreError::batch_not_found(batch_id))?;
        let status = derive_batch_status(
            &entry.counters,
            entry.batch.paused,
            entry.batch.cancel_requested,
        );
        if status.is_terminal() {
            return Err(CoreError::InvalidState(format!(
                "Cannot resume batch {batch_id} in terminal status {}",
                status.label()
            )));
        }
        entry.batch.paused = false;
        tracing::info!(batch_id, "Batch resumed");
        self.publish(SchedulerEvent::BatchResumed { batch_id });
        Ok(())
    }

    fn retry_failed_tasks(&mut self, batch_id: DbId) -> Result<RetryOutcome, CoreError> {
        let entry = self
            .registry
            .batch(batch_id)
            .ok_or_else(|| CoreError::batch_not_found(batch_id))?;
        if entry.batch.cancel_requested {
            return Err(CoreError::InvalidState(format!(
                "Cannot retry tasks of cancelled batch {batch_id}"
            )));
        }

        // Permanent-class failures are never requeued, not even here.
        let failed: Vec<(DbId, bool)> = entry
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| {
                let retryable = t
                    .last_error
                    .as_ref()
                    .map(|e| e.kind != FailureKind::Permanent)
                    .unwrap_or(true);
                (t.id, retryable)
            })
            .collect();

        let mut outcome = RetryOutcome {
            requeued: 0,
            permanent_skipped: 0,
        };
        for (task_id, retryable) in failed {
            if !retryable {
                outcome.permanent_skipped += 1;
                continue;
            }
            // Attempts are preserved: each explicit retry grants exactly
            // one more run, it does not reopen the whole budget.
            match self.registry.set_task_status(task_id, TaskStatus::Pending) {
                Ok(_) => outcome.requeued += 1,
                Err(e) => {
                    tracing::error!(task_id, error = %e, "Failed to requeue task");
                }
            }
        }

        if outcome.requeued > 0 {
            self.finished_announced.remove(&batch_id);
        }
        tracing::info!(
            batch_id,
            requeued = outcome.requeued,
            permanent_skipped = outcome.permanent_skipped,
            "Retry of failed tasks requested",
        );
        Ok(outcome)
    }

    // ---- internal event handling ----

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::TaskFinished(completion) => {
                self.handle_completion(completion).await;
            }
            InternalEvent::RetryDue { task_id } => {
                // Stale timers (task cancelled meanwhile) are ignored.
                if self.deferred.remove(&task_id) {
                    tracing::debug!(task_id, "Retry backoff elapsed");
                    self.tick().await;
                }
            }
            InternalEvent::CooldownOver { credential } => {
                if self.cooling.remove(&credential) {
                    tracing::info!(credential_ref = %credential, "Rate-limit cooldown over");
                    self.tick().await;
                }
            }
        }
    }

    async fn handle_completion(&mut self, completion: CompletionEvent) {
        let CompletionEvent { task_id, outcome } = completion;

        let Some(batch_id) = self.registry.batch_id_of_task(task_id) else {
            tracing::warn!(task_id, "Completion event for unknown task");
            return;
        };
        let is_running = self
            .registry
            .task(task_id)
            .map(|t| t.status == TaskStatus::Running)
            .unwrap_or(false);
        if !is_running {
            tracing::warn!(task_id, "Completion event for task that is not running");
            return;
        }

        self.global_running = self.global_running.saturating_sub(1);

        match outcome {
            TaskOutcome::Succeeded(output) => {
                if let Ok(task) = self.registry.set_task_status(task_id, TaskStatus::Succeeded) {
                    task.result = Some(output);
                    task.last_error = None;
                }
                tracing::debug!(batch_id, task_id, "Task succeeded");
                self.publish(SchedulerEvent::TaskSucceeded { batch_id, task_id });
            }
            TaskOutcome::Cancelled => {
                if let Err(e) = self.registry.set_task_status(task_id, TaskStatus::Cancelled) {
                    tracing::error!(task_id, error = %e, "Failed to mark task cancelled");
                }
                self.publish(SchedulerEvent::TaskCancelled { batch_id, task_id });
            }
            TaskOutcome::Failed(error) => {
                self.handle_failure(batch_id, task_id, error).await;
            }
        }

        self.check_batch_finished(batch_id);
        self.tick().await;
    }

    /// Decide what a failed run becomes: a backoff requeue, a credential
    /// cooldown, or a terminal failure.
    async fn handle_failure(&mut self, batch_id: DbId, task_id: DbId, error: ProviderError) {
        let kind = error.kind();
        let retry_after = match &error {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        let message = error.to_string();

        let Some((attempts, max_attempts)) = self
            .registry
            .task(task_id)
            .map(|t| (t.attempts, t.max_attempts))
        else {
            return;
        };
        let cancel_requested = self
            .registry
            .batch(batch_id)
            .map(|entry| entry.batch.cancel_requested)
            .unwrap_or(false);

        // A cancelled batch accepts failures as terminal; no re-admission.
        let decision = if cancel_requested {
            RetryDecision::Terminal
        } else {
            decide(&self.config.retry, kind, attempts, max_attempts)
        };

        match decision {
            RetryDecision::Requeue(delay) => {
                if let Ok(task) = self.registry.set_task_status(task_id, TaskStatus::Pending) {
                    task.last_error = Some(TaskError {
                        kind,
                        message: message.clone(),
                    });
                }
                self.deferred.insert(task_id);
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal_tx.send(InternalEvent::RetryDue { task_id });
                });
                tracing::info!(
                    batch_id,
                    task_id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Task failed; retry scheduled",
                );
                self.publish(SchedulerEvent::TaskFailed {
                    batch_id,
                    task_id,
                    will_retry: true,
                    error: message,
                });
            }

            RetryDecision::CoolDown => {
                if let Ok(task) = self.registry.set_task_status(task_id, TaskStatus::Pending) {
                    task.last_error = Some(TaskError {
                        kind,
                        message: message.clone(),
                    });
                    // Rate limiting is backpressure, not a task failure:
                    // the run does not charge the attempts budget.
                    task.attempts = task.attempts.saturating_sub(1);
                }
                self.start_cooldown(batch_id, retry_after);
            }

            RetryDecision::Terminal => {
                if let Ok(task) = self.registry.set_task_status(task_id, TaskStatus::Failed) {
                    task.last_error = Some(TaskError {
                        kind,
                        message: message.clone(),
                    });
                }
                tracing::warn!(batch_id, task_id, attempts, error = %message, "Task failed terminally");
                self.publish(SchedulerEvent::TaskFailed {
                    batch_id,
                    task_id,
                    will_retry: false,
                    error: message,
                });
            }
        }
    }

    /// Suspend admission for the batch's credential for the cooldown
    /// window (or the provider-suggested wait, when given).
    fn start_cooldown(&mut self, batch_id: DbId, retry_after: Option<std::time::Duration>) {
        let Some(credential_ref) = self
            .registry
            .batch(batch_id)
            .map(|entry| entry.batch.credential_ref.clone())
        else {
            return;
        };

        if !self.cooling.insert(credential_ref.clone()) {
            // Already cooling; the existing timer covers it.
            return;
        }

        let cooldown = retry_after.unwrap_or(self.config.rate_limit_cooldown);
        tracing::warn!(
            credential_ref = %credential_ref,
            cooldown_ms = cooldown.as_millis() as u64,
            "Provider rate limited; suspending admission for credential",
        );

        let internal_tx = self.internal_tx.clone();
        let credential = credential_ref.clone();
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let _ = internal_tx.send(InternalEvent::CooldownOver { credential });
        });
        self.publish(SchedulerEvent::CredentialCoolingDown { credential_ref });
    }

    // ---- admission ----

    /// One admission pass: fill available slots with Pending tasks,
    /// respecting per-batch caps, the global limit, priority order, and
    /// submission order within each batch.
    async fn tick(&mut self) {
        let mut available = self
            .config
            .global_limit
            .saturating_sub(self.global_running);
        if available == 0 {
            return;
        }

        // Candidates: non-paused, non-cancelled batches with headroom, an
        // admissible Pending task, and a credential not cooling down.
        let mut candidates: Vec<(i32, fabula_core::types::Timestamp, DbId)> = self
            .registry
            .batch_ids()
            .into_iter()
            .filter_map(|batch_id| {
                let entry = self.registry.batch(batch_id)?;
                let batch = &entry.batch;
                if batch.paused || batch.cancel_requested {
                    return None;
                }
                if entry.counters.pending == 0 {
                    return None;
                }
                if entry.counters.running >= batch.max_parallel {
                    return None;
                }
                if self.cooling.contains(&batch.credential_ref) {
                    return None;
                }
                Some((batch.priority, batch.created_at, batch_id))
            })
            .collect();

        // Priority desc, then first-submitted-first-served; id as the
        // deterministic tie-break for equal timestamps.
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        for (_, _, batch_id) in candidates {
            if available == 0 {
                break;
            }
            let Some(entry) = self.registry.batch(batch_id) else {
                continue;
            };
            let budget = entry
                .batch
                .max_parallel
                .saturating_sub(entry.counters.running)
                .min(available);

            // Tasks are stored in ascending sequence_index; admission
            // preserves submission order and skips deferred tasks.
            let picks: Vec<DbId> = entry
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending && !self.deferred.contains(&t.id))
                .take(budget)
                .map(|t| t.id)
                .collect();

            for task_id in picks {
                self.dispatch(batch_id, task_id).await;
                available -= 1;
            }
        }
    }

    /// Transition one Pending task to Running and hand it to the worker
    /// pool. The only place in the subsystem that performs this
    /// transition.
    async fn dispatch(&mut self, batch_id: DbId, task_id: DbId) {
        let (payload, attempt) = match self.registry.set_task_status(task_id, TaskStatus::Running)
        {
            Ok(task) => {
                task.attempts += 1;
                (task.payload.clone(), task.attempts)
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to mark task running");
                return;
            }
        };

        self.global_running += 1;
        self.pool
            .spawn(task_id, payload, self.config.task_timeout)
            .await;
        tracing::debug!(batch_id, task_id, attempt, "Task dispatched");
        self.publish(SchedulerEvent::TaskStarted {
            batch_id,
            task_id,
            attempt,
        });
    }

    // ---- helpers ----

    /// Announce a batch's terminal status exactly once.
    fn check_batch_finished(&mut self, batch_id: DbId) {
        let Some(entry) = self.registry.batch(batch_id) else {
            return;
        };
        let status = derive_batch_status(
            &entry.counters,
            entry.batch.paused,
            entry.batch.cancel_requested,
        );
        if status.is_terminal() && self.finished_announced.insert(batch_id) {
            tracing::info!(batch_id, status = status.label(), "Batch finished");
            self.publish(SchedulerEvent::BatchFinished { batch_id, status });
        }
    }

    fn publish(&self, event: SchedulerEvent) {
        // A send error only means there are zero subscribers.
        let _ = self.event_tx.send(event);
    }
}
