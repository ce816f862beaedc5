//! A development/test provider that fakes generation latency.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::provider::ImageProvider;

/// A provider that sleeps for a fixed latency and then succeeds, echoing
/// the request payload back as the result.
///
/// Used by the daemon binary when no real provider is configured, and by
/// integration tests that only care about scheduling behaviour.
pub struct StubProvider {
    latency: Duration,
}

impl StubProvider {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[async_trait::async_trait]
impl ImageProvider for StubProvider {
    async fn generate(
        &self,
        request: &serde_json::Value,
        client_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, ProviderError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(%client_id, "Stub generation cancelled");
                Err(ProviderError::Transient("cancelled".into()))
            }
            _ = tokio::time::sleep(self.latency) => {
                Ok(serde_json::json!({
                    "client_id": client_id.to_string(),
                    "echo": request,
                }))
            }
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_echoes_the_request() {
        let provider = StubProvider::new(Duration::from_millis(1));
        let result = provider
            .generate(
                &serde_json::json!({"prompt": "owl"}),
                Uuid::new_v4(),
                CancellationToken::new(),
            )
            .await
            .expect("stub should succeed");
        assert_eq!(result["echo"]["prompt"], "owl");
    }

    #[tokio::test]
    async fn stub_observes_cancellation() {
        let provider = StubProvider::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = provider
            .generate(&serde_json::json!({}), Uuid::new_v4(), cancel)
            .await;
        assert!(result.is_err());
    }
}
