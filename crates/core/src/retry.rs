//! Failure classification and exponential-backoff retry policy.
//!
//! The policy itself is pure: the coordinator asks [`decide`] what to do
//! with a failed task and owns the timers that act on the answer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// Class of a provider failure, which determines retry handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network errors, 5xx responses, timeouts. Retried with backoff.
    Transient,
    /// Provider-wide backpressure. Cools the credential down instead of
    /// failing the task.
    RateLimited,
    /// Invalid credential, policy violation, malformed payload. Never
    /// retried, not even via the explicit retry operation.
    Permanent,
}

// ---------------------------------------------------------------------------
// Backoff policy
// ---------------------------------------------------------------------------

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before re-admitting a task that has already started
    /// `attempts` runs: `base_delay * 2^attempts`, clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempts);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Retry decision
// ---------------------------------------------------------------------------

/// What the coordinator should do with a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the task to Pending after the given backoff delay.
    Requeue(Duration),
    /// Put the batch's credential into a cooldown window; the task returns
    /// to Pending without charging its attempts budget.
    CoolDown,
    /// The task becomes terminally Failed.
    Terminal,
}

/// Decide how a failure of class `kind` is handled for a task that has
/// started `attempts` runs out of a budget of `max_attempts`.
///
/// `attempts` counts *started* runs (incremented at dispatch), so a task
/// with `max_attempts = 3` under persistent transient failure runs exactly
/// three times before settling into Failed.
pub fn decide(
    policy: &RetryPolicy,
    kind: FailureKind,
    attempts: u32,
    max_attempts: u32,
) -> RetryDecision {
    match kind {
        FailureKind::Permanent => RetryDecision::Terminal,
        FailureKind::RateLimited => RetryDecision::CoolDown,
        FailureKind::Transient => {
            if attempts < max_attempts {
                RetryDecision::Requeue(policy.delay_for_attempt(attempts))
            } else {
                RetryDecision::Terminal
            }
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
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_clamps_at_max() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(10));
    }

    #[test]
    fn huge_attempt_count_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay);
    }

    #[test]
    fn transient_within_budget_requeues_with_backoff() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
        };
        assert_eq!(
            decide(&policy, FailureKind::Transient, 1, 3),
            RetryDecision::Requeue(Duration::from_secs(2))
        );
    }

    #[test]
    fn transient_with_exhausted_budget_is_terminal() {
        let policy = RetryPolicy::default();
        assert_eq!(
            decide(&policy, FailureKind::Transient, 3, 3),
            RetryDecision::Terminal
        );
    }

    #[test]
    fn permanent_is_terminal_even_with_budget_left() {
        let policy = RetryPolicy::default();
        assert_eq!(
            decide(&policy, FailureKind::Permanent, 0, 3),
            RetryDecision::Terminal
        );
    }

    #[test]
    fn rate_limited_cools_down_regardless_of_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(
            decide(&policy, FailureKind::RateLimited, 99, 3),
            RetryDecision::CoolDown
        );
    }
}
