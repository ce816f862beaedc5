//! Scheduler configuration loaded from environment variables.

use std::time::Duration;

use fabula_core::retry::RetryPolicy;

/// Scheduler configuration.
///
/// All fields have defaults suitable for local development; override via
/// environment variables in production.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global concurrency limit across all batches (default: `4`).
    pub global_limit: usize,
    /// Per-task execution timeout; a timeout surfaces as a transient
    /// failure (default: `600` seconds).
    pub task_timeout: Duration,
    /// Backoff policy for transient-failure retries.
    pub retry: RetryPolicy,
    /// How long admission is suspended for a credential after the provider
    /// signals rate limiting (default: `30` seconds).
    pub rate_limit_cooldown: Duration,
    /// Buffer capacity of the scheduler event broadcast channel.
    pub event_capacity: usize,
    /// Buffer capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            global_limit: 4,
            task_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            rate_limit_cooldown: Duration::from_secs(30),
            event_capacity: 256,
            command_buffer: 64,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default  |
    /// |-----------------------------------|----------|
    /// | `FABULA_GLOBAL_LIMIT`             | `4`      |
    /// | `FABULA_TASK_TIMEOUT_SECS`        | `600`    |
    /// | `FABULA_RETRY_BASE_MS`            | `2000`   |
    /// | `FABULA_RETRY_MAX_MS`             | `300000` |
    /// | `FABULA_RATE_LIMIT_COOLDOWN_SECS` | `30`     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let global_limit: usize = env_parsed("FABULA_GLOBAL_LIMIT", defaults.global_limit);
        let task_timeout = Duration::from_secs(env_parsed(
            "FABULA_TASK_TIMEOUT_SECS",
            defaults.task_timeout.as_secs(),
        ));
        let retry = RetryPolicy {
            base_delay: Duration::from_millis(env_parsed(
                "FABULA_RETRY_BASE_MS",
                defaults.retry.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_parsed(
                "FABULA_RETRY_MAX_MS",
                defaults.retry.max_delay.as_millis() as u64,
            )),
        };
        let rate_limit_cooldown = Duration::from_secs(env_parsed(
            "FABULA_RATE_LIMIT_COOLDOWN_SECS",
            defaults.rate_limit_cooldown.as_secs(),
        ));

        Self {
            global_limit,
            task_timeout,
            retry,
            rate_limit_cooldown,
            ..defaults
        }
    }
}

/// Read an env var and parse it, panicking on malformed values so a bad
/// deployment fails loudly at startup instead of running misconfigured.
fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{var} must be a valid value, got '{raw}'")),
        Err(_) => default,
    }
}
