//! Incremental per-batch progress counters.
//!
//! Counters are updated on every status transition rather than recomputed
//! by scanning tasks, so aggregate status queries are O(1) amortized.

use serde::{Deserialize, Serialize};

use crate::status::TaskStatus;

/// Per-batch task counts, one bucket per [`TaskStatus`].
///
/// Invariant: the five buckets always sum to the batch's task count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ProgressCounters {
    /// Counters for a freshly submitted batch of `total` pending tasks.
    pub fn new_pending(total: usize) -> Self {
        Self {
            pending: total,
            ..Default::default()
        }
    }

    /// Total number of tasks across all buckets.
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed + self.cancelled
    }

    /// Number of tasks in a terminal status.
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Fraction of tasks that reached a terminal status, in `0.0..=1.0`.
    ///
    /// An empty batch reports 0.0 (submission validation forbids empty
    /// batches, but recovered data is not trusted to uphold that).
    pub fn percent_complete(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.terminal() as f64 / total as f64
    }

    /// Record a single task's transition from `from` to `to`.
    ///
    /// Must be called exactly once per applied transition; the registry is
    /// the only caller.
    pub fn record_transition(&mut self, from: TaskStatus, to: TaskStatus) {
        *self.bucket_mut(from) -= 1;
        *self.bucket_mut(to) += 1;
    }

    fn bucket_mut(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Succeeded => &mut self.succeeded,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pending_puts_everything_in_pending() {
        let c = ProgressCounters::new_pending(5);
        assert_eq!(c.pending, 5);
        assert_eq!(c.total(), 5);
        assert_eq!(c.terminal(), 0);
    }

    #[test]
    fn record_transition_moves_between_buckets() {
        let mut c = ProgressCounters::new_pending(3);
        c.record_transition(TaskStatus::Pending, TaskStatus::Running);
        assert_eq!(c.pending, 2);
        assert_eq!(c.running, 1);

        c.record_transition(TaskStatus::Running, TaskStatus::Succeeded);
        assert_eq!(c.running, 0);
        assert_eq!(c.succeeded, 1);

        // Partition invariant holds after every transition.
        assert_eq!(c.total(), 3);
    }

    #[test]
    fn percent_complete_counts_all_terminal_buckets() {
        let mut c = ProgressCounters::new_pending(4);
        c.record_transition(TaskStatus::Pending, TaskStatus::Running);
        c.record_transition(TaskStatus::Running, TaskStatus::Succeeded);
        c.record_transition(TaskStatus::Pending, TaskStatus::Running);
        c.record_transition(TaskStatus::Running, TaskStatus::Failed);
        c.record_transition(TaskStatus::Pending, TaskStatus::Cancelled);
        // 3 of 4 terminal
        assert!((c.percent_complete() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn percent_complete_of_empty_is_zero() {
        let c = ProgressCounters::default();
        assert_eq!(c.percent_complete(), 0.0);
    }
}
