//! Crash recovery against the persistent job store.
//!
//! The on-disk format is owned by the surrounding application; this module
//! only defines the [`JobStore`] seam and the reload rule: batches left in
//! a non-terminal state by a previous run are re-entered into scheduling,
//! and tasks that were Running at the crash are treated as Pending because
//! their in-flight outcome is unknown.

use fabula_core::batch::{Batch, Task, TaskError};
use fabula_core::status::TaskStatus;
use fabula_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Error from the persistent job store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store backend error: {0}")]
    Backend(String),
}

/// A task row as persisted by a previous run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTask {
    pub id: DbId,
    pub sequence_index: u32,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<TaskError>,
    pub result: Option<serde_json::Value>,
}

/// A batch row (with its tasks) as persisted by a previous run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedBatch {
    pub id: DbId,
    pub name: String,
    pub project_id: DbId,
    pub priority: i32,
    pub max_parallel: usize,
    pub created_at: Timestamp,
    pub credential_ref: String,
    pub paused: bool,
    pub tasks: Vec<PersistedTask>,
}

/// The persistent job store collaborator.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    /// Load every batch left in a non-terminal state by a prior run.
    async fn load_unfinished(&self) -> Result<Vec<PersistedBatch>, StoreError>;
}

/// Convert a persisted batch into live entities, mapping Running tasks
/// back to Pending (their in-flight outcome from the crashed run is
/// unknown, so they must be re-executed).
pub fn restore(persisted: PersistedBatch) -> (Batch, Vec<Task>) {
    let batch = Batch {
        id: persisted.id,
        name: persisted.name,
        project_id: persisted.project_id,
        priority: persisted.priority,
        // A corrupt row must not wedge admission.
        max_parallel: persisted.max_parallel.max(1),
        created_at: persisted.created_at,
        credential_ref: persisted.credential_ref,
        paused: persisted.paused,
        cancel_requested: false,
    };

    let mut tasks: Vec<Task> = persisted
        .tasks
        .into_iter()
        .map(|task| {
            let status = match task.status {
                TaskStatus::Running => TaskStatus::Pending,
                other => other,
            };
            Task {
                id: task.id,
                batch_id: batch.id,
                sequence_index: task.sequence_index,
                payload: task.payload,
                status,
                attempts: task.attempts,
                max_attempts: task.max_attempts,
                last_error: task.last_error,
                result: task.result,
            }
        })
        .collect();
    tasks.sort_by_key(|t| t.sequence_index);

    (batch, tasks)
}

/// An in-memory job store, for tests and for running without persistence.
#[derive(Default)]
pub struct MemoryJobStore {
    batches: Mutex<Vec<PersistedBatch>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a persisted batch.
    pub async fn push(&self, batch: PersistedBatch) {
        self.batches.lock().await.push(batch);
    }
}

#[async_trait::async_trait]
impl JobStore for MemoryJobStore {
    async fn load_unfinished(&self) -> Result<Vec<PersistedBatch>, StoreError> {
        Ok(self.batches.lock().await.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
