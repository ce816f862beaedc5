//! Batch and task entities, submission DTOs, validation, and summary views.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::progress::ProgressCounters;
use crate::retry::FailureKind;
use crate::status::{derive_batch_status, BatchStatus, TaskStatus};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority value for urgent batches. Admitted before all others.
pub const PRIORITY_URGENT: i32 = 10;

/// Priority value for normal batches. Default.
pub const PRIORITY_NORMAL: i32 = 0;

/// Priority value for background batches. Admitted last.
pub const PRIORITY_BACKGROUND: i32 = -10;

// ---------------------------------------------------------------------------
// Validation limits
// ---------------------------------------------------------------------------

/// Maximum length of a batch name.
const MAX_NAME_LEN: usize = 256;

/// Default per-task attempts budget when the submission does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A named group of independent generation tasks submitted together under
/// one priority/concurrency policy.
///
/// `paused` and `cancel_requested` are control flags; the batch status is
/// always derived from them plus the task counters, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: DbId,
    pub name: String,
    pub project_id: DbId,
    /// Higher value is more urgent.
    pub priority: i32,
    /// Per-batch concurrency cap (at least 1).
    pub max_parallel: usize,
    pub created_at: Timestamp,
    /// Opaque reference to the provider credential this batch runs under.
    pub credential_ref: String,
    pub paused: bool,
    pub cancel_requested: bool,
}

/// The last recorded failure of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

/// One unit of generation work within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: DbId,
    pub batch_id: DbId,
    /// Submission order within the batch; admission always scans ascending.
    pub sequence_index: u32,
    /// Opaque request payload forwarded to the provider.
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    /// Number of runs started for this task (incremented at dispatch).
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<TaskError>,
    /// Opaque success payload from the provider.
    pub result: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Submission DTOs + validation
// ---------------------------------------------------------------------------

/// One task in a submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub payload: serde_json::Value,
}

/// A request to create a batch with its tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub name: String,
    pub project_id: DbId,
    #[serde(default)]
    pub priority: i32,
    pub max_parallel: usize,
    pub credential_ref: String,
    pub tasks: Vec<TaskSubmission>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Validate a batch submission.
///
/// Rules:
/// - `name` must be non-empty and at most `MAX_NAME_LEN` characters.
/// - `tasks` must not be empty.
/// - `max_parallel` must be at least 1.
/// - `credential_ref` must be non-empty.
/// - `max_attempts` must be at least 1.
pub fn validate_submission(submission: &BatchSubmission) -> Result<(), CoreError> {
    if submission.name.trim().is_empty() {
        return Err(CoreError::Validation(
            "Batch name must not be empty".to_string(),
        ));
    }
    if submission.name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Batch name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if submission.tasks.is_empty() {
        return Err(CoreError::Validation(
            "A batch must contain at least one task".to_string(),
        ));
    }
    if submission.max_parallel < 1 {
        return Err(CoreError::Validation(
            "max_parallel must be at least 1".to_string(),
        ));
    }
    if submission.credential_ref.trim().is_empty() {
        return Err(CoreError::Validation(
            "credential_ref must be provided".to_string(),
        ));
    }
    if submission.max_attempts < 1 {
        return Err(CoreError::Validation(
            "max_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Summary views
// ---------------------------------------------------------------------------

/// One summary row per batch, without per-task detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: DbId,
    pub name: String,
    pub project_id: DbId,
    pub priority: i32,
    pub status: BatchStatus,
    pub counts: ProgressCounters,
    /// Fraction of tasks in a terminal status, `0.0..=1.0`.
    pub percent_complete: f64,
    pub created_at: Timestamp,
}

impl BatchSummary {
    /// Build a summary row from a batch and its live counters.
    pub fn from_parts(batch: &Batch, counts: ProgressCounters) -> Self {
        let status = derive_batch_status(&counts, batch.paused, batch.cancel_requested);
        Self {
            batch_id: batch.id,
            name: batch.name.clone(),
            project_id: batch.project_id,
            priority: batch.priority,
            status,
            counts,
            percent_complete: counts.percent_complete(),
            created_at: batch.created_at,
        }
    }
}

/// Per-task status row inside a [`BatchDetail`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub task_id: DbId,
    pub sequence_index: u32,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<TaskError>,
}

impl TaskView {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            sequence_index: task.sequence_index,
            status: task.status,
            attempts: task.attempts,
            last_error: task.last_error.clone(),
        }
    }
}

/// Full status of one batch: the summary row plus every task's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    pub summary: BatchSummary,
    pub tasks: Vec<TaskView>,
}

/// Result of the explicit retry-failed-tasks operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryOutcome {
    /// Number of tasks moved back to Pending.
    pub requeued: usize,
    /// Number of permanently failed tasks left untouched.
    pub permanent_skipped: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> BatchSubmission {
        BatchSubmission {
            name: "Chapter 3 illustrations".into(),
            project_id: 1,
            priority: PRIORITY_NORMAL,
            max_parallel: 2,
            credential_ref: "cred-main".into(),
            tasks: vec![TaskSubmission {
                payload: serde_json::json!({"prompt": "a lighthouse at dusk"}),
            }],
            max_attempts: 3,
        }
    }

    #[test]
    fn valid_submission_passes() {
        assert!(validate_submission(&submission()).is_ok());
    }

    #[test]
    fn empty_task_list_rejected() {
        let mut s = submission();
        s.tasks.clear();
        let err = validate_submission(&s).unwrap_err();
        assert!(err.to_string().contains("at least one task"));
    }

    #[test]
    fn zero_max_parallel_rejected() {
        let mut s = submission();
        s.max_parallel = 0;
        let err = validate_submission(&s).unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn missing_credential_rejected() {
        let mut s = submission();
        s.credential_ref = "  ".into();
        let err = validate_submission(&s).unwrap_err();
        assert!(err.to_string().contains("credential_ref"));
    }

    #[test]
    fn empty_name_rejected() {
        let mut s = submission();
        s.name = "".into();
        assert!(validate_submission(&s).is_err());
    }

    #[test]
    fn oversized_name_rejected() {
        let mut s = submission();
        s.name = "a".repeat(300);
        assert!(validate_submission(&s).is_err());
    }

    #[test]
    fn zero_max_attempts_rejected() {
        let mut s = submission();
        s.max_attempts = 0;
        assert!(validate_submission(&s).is_err());
    }

    #[test]
    fn summary_derives_status_from_counters() {
        let batch = Batch {
            id: 7,
            name: "b".into(),
            project_id: 1,
            priority: 0,
            max_parallel: 2,
            created_at: chrono::Utc::now(),
            credential_ref: "cred".into(),
            paused: false,
            cancel_requested: false,
        };
        let counts = ProgressCounters::new_pending(3);
        let summary = BatchSummary::from_parts(&batch, counts);
        assert_eq!(summary.status, BatchStatus::Queued);
        assert_eq!(summary.counts.pending, 3);
        assert_eq!(summary.percent_complete, 0.0);
    }
}
