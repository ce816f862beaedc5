//! The provider trait the worker pool executes against.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ProviderError;

/// An external image-generation backend.
///
/// Implementations must be safe to call concurrently: the worker pool
/// issues one `generate` call per running task, up to the configured
/// concurrency limits.
///
/// Cancellation is cooperative. Implementations should observe `cancel`
/// promptly and abandon in-flight work, but callers accept whatever
/// terminal outcome eventually arrives.
#[async_trait::async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate one illustration from an opaque request payload.
    ///
    /// `client_id` is a fresh id per attempt, used for correlating the
    /// submission on the provider side (retries get a new id).
    async fn generate(
        &self,
        request: &serde_json::Value,
        client_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}
