//! Provider failure taxonomy.

use std::time::Duration;

use fabula_core::retry::FailureKind;

/// A failure reported by an image-generation provider.
///
/// The variant determines retry handling: transient failures are retried
/// with backoff, rate limiting cools the credential down, and permanent
/// failures are never retried.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network error, 5xx response, or timeout.
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Provider-wide backpressure signal for the active credential.
    #[error("Provider rate limited")]
    RateLimited {
        /// Provider-suggested wait, when the response carried one.
        retry_after: Option<Duration>,
    },

    /// Invalid credential, policy violation, or malformed payload.
    #[error("Permanent provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    /// The retry-relevant class of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transient(_) => FailureKind::Transient,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::Permanent(_) => FailureKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(
            ProviderError::Transient("boom".into()).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            ProviderError::Permanent("bad key".into()).kind(),
            FailureKind::Permanent
        );
    }
}
