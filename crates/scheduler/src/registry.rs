//! In-memory registry owning all batch and task entities.
//!
//! The registry is owned exclusively by the coordinator task, so it needs
//! no interior locking: every mutation is applied serially, and a read can
//! never observe a half-applied write. Status transitions go through
//! [`BatchRegistry::set_task_status`], which validates them against the
//! task state machine and keeps the per-batch counters in lockstep.

use std::collections::HashMap;

use fabula_core::batch::{Batch, BatchDetail, BatchSubmission, BatchSummary, Task, TaskView};
use fabula_core::error::CoreError;
use fabula_core::progress::ProgressCounters;
use fabula_core::status::{validate_transition, TaskStatus};
use fabula_core::types::{DbId, Timestamp};

/// A batch together with its tasks and live counters.
#[derive(Debug)]
pub struct BatchEntry {
    pub batch: Batch,
    /// Tasks in ascending `sequence_index` order. Never reordered.
    pub tasks: Vec<Task>,
    pub counters: ProgressCounters,
}

/// Owner of all Batch/Task entities, keyed by id.
#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: HashMap<DbId, BatchEntry>,
    /// Task id -> owning batch id.
    task_index: HashMap<DbId, DbId>,
    next_id: DbId,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self {
            batches: HashMap::new(),
            task_index: HashMap::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> DbId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Create a batch and its tasks from a validated submission.
    ///
    /// All tasks start Pending. Returns the new batch id.
    pub fn create(&mut self, submission: BatchSubmission, now: Timestamp) -> DbId {
        let batch_id = self.allocate_id();
        let batch = Batch {
            id: batch_id,
            name: submission.name,
            project_id: submission.project_id,
            priority: submission.priority,
            max_parallel: submission.max_parallel,
            created_at: now,
            credential_ref: submission.credential_ref,
            paused: false,
            cancel_requested: false,
        };

        let tasks: Vec<Task> = submission
            .tasks
            .into_iter()
            .enumerate()
            .map(|(index, task)| Task {
                id: self.allocate_id(),
                batch_id,
                sequence_index: index as u32,
                payload: task.payload,
                status: TaskStatus::Pending,
                attempts: 0,
                max_attempts: submission.max_attempts,
                last_error: None,
                result: None,
            })
            .collect();

        for task in &tasks {
            self.task_index.insert(task.id, batch_id);
        }
        let counters = ProgressCounters::new_pending(tasks.len());
        self.batches.insert(
            batch_id,
            BatchEntry {
                batch,
                tasks,
                counters,
            },
        );
        batch_id
    }

    /// Re-enter a batch recovered from the persistent job store, keeping
    /// its original ids. Counters are rebuilt by a one-time scan.
    pub fn insert_recovered(&mut self, batch: Batch, tasks: Vec<Task>) {
        let batch_id = batch.id;
        self.next_id = self.next_id.max(batch_id + 1);

        let mut counters = ProgressCounters::default();
        for task in &tasks {
            self.next_id = self.next_id.max(task.id + 1);
            self.task_index.insert(task.id, batch_id);
            match task.status {
                TaskStatus::Pending => counters.pending += 1,
                TaskStatus::Running => counters.running += 1,
                TaskStatus::Succeeded => counters.succeeded += 1,
                TaskStatus::Failed => counters.failed += 1,
                TaskStatus::Cancelled => counters.cancelled += 1,
            }
        }

        self.batches.insert(
            batch_id,
            BatchEntry {
                batch,
                tasks,
                counters,
            },
        );
    }

    pub fn batch(&self, batch_id: DbId) -> Option<&BatchEntry> {
        self.batches.get(&batch_id)
    }

    pub fn batch_mut(&mut self, batch_id: DbId) -> Option<&mut BatchEntry> {
        self.batches.get_mut(&batch_id)
    }

    /// The batch a task belongs to, if the task exists.
    pub fn batch_id_of_task(&self, task_id: DbId) -> Option<DbId> {
        self.task_index.get(&task_id).copied()
    }

    pub fn task(&self, task_id: DbId) -> Option<&Task> {
        let batch_id = self.batch_id_of_task(task_id)?;
        self.batches
            .get(&batch_id)?
            .tasks
            .iter()
            .find(|t| t.id == task_id)
    }

    /// Apply a task status transition, updating the batch counters.
    ///
    /// The transition is validated against the task state machine; invalid
    /// transitions are rejected without mutating anything. Returns the
    /// mutated task so the caller can record a result or error on it.
    pub fn set_task_status(
        &mut self,
        task_id: DbId,
        to: TaskStatus,
    ) -> Result<&mut Task, CoreError> {
        let batch_id = self
            .batch_id_of_task(task_id)
            .ok_or_else(|| CoreError::task_not_found(task_id))?;
        let entry = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| CoreError::batch_not_found(batch_id))?;
        let task = entry
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoreError::task_not_found(task_id))?;

        validate_transition(task.status, to).map_err(CoreError::Internal)?;
        entry.counters.record_transition(task.status, to);
        task.status = to;
        Ok(task)
    }

    /// All batch ids, in no particular order.
    pub fn batch_ids(&self) -> Vec<DbId> {
        self.batches.keys().copied().collect()
    }

    /// One summary row per batch, ordered by submission (id ascending).
    pub fn summaries(&self) -> Vec<BatchSummary> {
        let mut rows: Vec<BatchSummary> = self
            .batches
            .values()
            .map(|entry| BatchSummary::from_parts(&entry.batch, entry.counters))
            .collect();
        rows.sort_by_key(|row| row.batch_id);
        rows
    }

    /// Full per-task status for one batch.
    pub fn detail(&self, batch_id: DbId) -> Result<BatchDetail, CoreError> {
        let entry = self
            .batches
            .get(&batch_id)
            .ok_or_else(|| CoreError::batch_not_found(batch_id))?;
        Ok(BatchDetail {
            summary: BatchSummary::from_parts(&entry.batch, entry.counters),
            tasks: entry.tasks.iter().map(TaskView::from_task).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
