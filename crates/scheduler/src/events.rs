//! Scheduler lifecycle events broadcast to observers.
//!
//! The coordinator publishes these on a `tokio::sync::broadcast` channel;
//! subscribe via [`crate::Scheduler::subscribe`]. Publishing with zero
//! subscribers is a no-op, and slow subscribers observe `RecvError::Lagged`
//! when the buffer wraps.

use fabula_core::status::BatchStatus;
use fabula_core::types::DbId;
use serde::Serialize;

/// A scheduler-level event.
#[derive(Debug, Clone, Serialize)]
pub enum SchedulerEvent {
    /// A batch passed validation and was registered.
    BatchSubmitted { batch_id: DbId, task_count: usize },

    /// A task was admitted and dispatched to the worker pool.
    TaskStarted {
        batch_id: DbId,
        task_id: DbId,
        /// 1-based run number for this task.
        attempt: u32,
    },

    /// A task completed successfully.
    TaskSucceeded { batch_id: DbId, task_id: DbId },

    /// A task run failed.
    TaskFailed {
        batch_id: DbId,
        task_id: DbId,
        /// Whether the scheduler will requeue the task automatically.
        will_retry: bool,
        error: String,
    },

    /// A task was cancelled.
    TaskCancelled { batch_id: DbId, task_id: DbId },

    /// A batch was paused by the user.
    BatchPaused { batch_id: DbId },

    /// A paused batch was resumed.
    BatchResumed { batch_id: DbId },

    /// A batch was cancelled by the user.
    BatchCancelled { batch_id: DbId },

    /// A batch reached a terminal status.
    BatchFinished { batch_id: DbId, status: BatchStatus },

    /// The provider rate-limited a credential; admission for batches using
    /// it is suspended for the cooldown window.
    CredentialCoolingDown { credential_ref: String },
}
