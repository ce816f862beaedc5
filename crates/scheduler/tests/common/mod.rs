//! Shared fixtures for the scheduler integration tests: fast configs,
//! controllable providers, and polling helpers.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabula_core::batch::{BatchSubmission, TaskSubmission, PRIORITY_NORMAL};
use fabula_core::retry::RetryPolicy;
use fabula_provider::{ImageProvider, ProviderError};
use fabula_scheduler::{SchedulerConfig, SchedulerEvent};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Config and submissions
// ---------------------------------------------------------------------------

/// A config with short timings so tests finish in milliseconds.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        global_limit: 4,
        task_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(80),
        },
        rate_limit_cooldown: Duration::from_millis(100),
        ..SchedulerConfig::default()
    }
}

pub fn submission(name: &str, task_count: usize) -> BatchSubmission {
    BatchSubmission {
        name: name.to_string(),
        project_id: 1,
        priority: PRIORITY_NORMAL,
        max_parallel: 2,
        credential_ref: "default-key".to_string(),
        max_attempts: 3,
        tasks: (0..task_count)
            .map(|i| TaskSubmission {
                payload: serde_json::json!({ "scene": i }),
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Succeeds after a short sleep, tracking the high-water mark of
/// concurrently running generations.
pub struct CountingProvider {
    pub latency: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageProvider for CountingProvider {
    async fn generate(
        &self,
        request: &serde_json::Value,
        _client_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(ProviderError::Transient("generation cancelled".to_string())),
            _ = tokio::time::sleep(self.latency) => Ok(serde_json::json!({ "image": request })),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Blocks each generation until a permit is released, so tests can hold
/// tasks in the Running state deliberately.
pub struct GatedProvider {
    gate: tokio::sync::Semaphore,
    started: AtomicUsize,
    order: std::sync::Mutex<Vec<serde_json::Value>>,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            gate: tokio::sync::Semaphore::new(0),
            started: AtomicUsize::new(0),
            order: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Let `n` blocked generations finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Payloads in the order their generations started.
    pub fn start_order(&self) -> Vec<serde_json::Value> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ImageProvider for GatedProvider {
    async fn generate(
        &self,
        request: &serde_json::Value,
        _client_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(request.clone());

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(ProviderError::Transient("generation cancelled".to_string()))
            }
            permit = self.gate.acquire() => {
                permit.expect("gate closed").forget();
                Ok(serde_json::json!({ "image": request }))
            }
        }
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Fails every call with the same error.
pub struct AlwaysFailProvider {
    pub error: fn() -> ProviderError,
    calls: AtomicUsize,
}

impl AlwaysFailProvider {
    pub fn transient() -> Self {
        Self {
            error: || ProviderError::Transient("backend hiccup".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn permanent() -> Self {
        Self {
            error: || ProviderError::Permanent("prompt rejected".to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageProvider for AlwaysFailProvider {
    async fn generate(
        &self,
        _request: &serde_json::Value,
        _client_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.error)())
    }

    fn name(&self) -> &str {
        "always-fail"
    }
}

/// Returns the given error for the first `n` calls, then succeeds.
pub struct FailNThenSucceed {
    error: fn() -> ProviderError,
    remaining: AtomicUsize,
    calls: AtomicUsize,
}

impl FailNThenSucceed {
    pub fn new(n: usize, error: fn() -> ProviderError) -> Self {
        Self {
            error,
            remaining: AtomicUsize::new(n),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageProvider for FailNThenSucceed {
    async fn generate(
        &self,
        request: &serde_json::Value,
        _client_id: Uuid,
        _cancel: CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prev = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev > 0 {
            Err((self.error)())
        } else {
            Ok(serde_json::json!({ "image": request }))
        }
    }

    fn name(&self) -> &str {
        "fail-n"
    }
}

// ---------------------------------------------------------------------------
// Polling helpers
// ---------------------------------------------------------------------------

/// Poll `check` until it returns true, or panic after ~5 seconds.
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// Read events until one matches, or panic after 5 seconds.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SchedulerEvent>,
    what: &str,
    mut matches: F,
) -> SchedulerEvent
where
    F: FnMut(&SchedulerEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event: {what}"))
            .expect("event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

/// Arc helper so a provider can be handed to the scheduler and still be
/// inspected by the test.
pub fn shared<P: ImageProvider + 'static>(provider: P) -> (Arc<P>, Arc<dyn ImageProvider>) {
    let concrete = Arc::new(provider);
    let erased: Arc<dyn ImageProvider> = concrete.clone();
    (concrete, erased)
}
