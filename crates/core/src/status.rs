//! Task and batch status enums plus the state machines that govern them.
//!
//! The batch status is never stored: it is a pure function of the batch's
//! task counters and its paused/cancelled flags (see [`derive_batch_status`]),
//! so it can never drift out of sync with the tasks.

use serde::{Deserialize, Serialize};

use crate::progress::ProgressCounters;

// ---------------------------------------------------------------------------
// Task status
// ---------------------------------------------------------------------------

/// Status of an individual generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for admission (includes tasks waiting out a retry backoff).
    Pending,
    /// Dispatched to the worker pool and executing against the provider.
    Running,
    /// The provider returned a result.
    Succeeded,
    /// Terminally failed — retryable only via the explicit retry operation.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl TaskStatus {
    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Numeric ID for persistence (matches the job-store seed data).
    pub fn id(self) -> i16 {
        match self {
            Self::Pending => 1,
            Self::Running => 2,
            Self::Succeeded => 3,
            Self::Failed => 4,
            Self::Cancelled => 5,
        }
    }

    /// Whether this status is terminal for ordinary scheduling.
    ///
    /// `Failed` is terminal here even though the explicit retry operation
    /// may later move it back to `Pending`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Returns the set of valid target statuses reachable from `from`.
///
/// `Running -> Pending` covers the requeue paths (transient-failure backoff
/// and rate-limit cooldown). `Failed -> Pending` exists only for the
/// explicit retry operation. `Succeeded` and `Cancelled` return an empty
/// slice: no further transitions are allowed.
pub fn valid_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        Pending => &[Running, Cancelled],
        Running => &[Succeeded, Failed, Cancelled, Pending],
        Failed => &[Pending],
        Succeeded | Cancelled => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate a task state transition, returning an error message for
/// invalid ones.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<(), String> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(format!(
            "Invalid task transition: {} -> {}",
            from.label(),
            to.label()
        ))
    }
}

// ---------------------------------------------------------------------------
// Batch status
// ---------------------------------------------------------------------------

/// Derived status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Submitted, no task has run yet.
    Queued,
    /// At least one task is running, or tasks remain to be admitted.
    Running,
    /// Paused by the user and fully drained (no task running).
    Paused,
    /// All tasks terminal with mixed outcomes.
    PartiallyFailed,
    /// Every task succeeded.
    Completed,
    /// All tasks terminal, at least one failed, none succeeded.
    Failed,
    /// Cancel was issued for the batch.
    Cancelled,
}

impl BatchStatus {
    /// Human-readable label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::PartiallyFailed => "Partially Failed",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether the batch can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PartiallyFailed | Self::Completed | Self::Failed | Self::Cancelled
        )
    }
}

/// Derive a batch's status from its task counters and control flags.
///
/// Precedence, highest first:
/// 1. `Cancelled` if cancel was issued.
/// 2. `Paused` if the paused flag is set and no task is running.
/// 3. `Completed` if every task succeeded.
/// 4. `Failed` if all tasks are terminal, at least one failed, none succeeded.
/// 5. `PartiallyFailed` if all tasks are terminal with mixed outcomes.
/// 6. `Running` if any task is running.
/// 7. `Queued` otherwise.
pub fn derive_batch_status(
    counters: &ProgressCounters,
    paused: bool,
    cancel_requested: bool,
) -> BatchStatus {
    if cancel_requested {
        return BatchStatus::Cancelled;
    }
    if paused && counters.running == 0 {
        return BatchStatus::Paused;
    }
    let total = counters.total();
    if total > 0 && counters.succeeded == total {
        return BatchStatus::Completed;
    }
    if counters.pending == 0 && counters.running == 0 {
        if counters.failed > 0 && counters.succeeded == 0 {
            return BatchStatus::Failed;
        }
        if counters.failed > 0 || counters.cancelled > 0 {
            return BatchStatus::PartiallyFailed;
        }
    }
    if counters.running > 0 {
        return BatchStatus::Running;
    }
    BatchStatus::Queued
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
