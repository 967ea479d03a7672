//! Provider abstraction for the upstream text generation API
//!
//! Defines the `GenerationProvider` trait that decouples the credential
//! rotation loop from the concrete HTTP call. `GeminiProvider` talks to the
//! Google Generative Language API; tests substitute scripted providers.

pub mod gemini;

pub use gemini::GeminiProvider;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Classification of a provider error for the rotation loop.
///
/// - Transient: this credential hit its quota or rate limit (or timed out);
///   try the next credential
/// - Fatal: stop rotating and surface the error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    Transient,
    Fatal,
}

/// Errors from a single provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Non-success HTTP status; body is truncated
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Provider refused to answer (safety block or similar)
    #[error("prompt blocked: {0}")]
    Blocked(String),
}

impl ProviderError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// A text generation backend callable with one credential at a time.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn GenerationProvider>`).
pub trait GenerationProvider: Send + Sync {
    /// Identifier for logging and health reporting (e.g. "gemini")
    fn id(&self) -> &str;

    /// Submit `prompt` authenticated with `api_key` and return the completion text.
    ///
    /// Exactly one upstream request per call. No retries here: the caller owns
    /// the rotation policy.
    fn generate<'a>(
        &'a self,
        api_key: &'a str,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_accessor() {
        let err = ProviderError::Status {
            status: 429,
            body: "quota".into(),
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(ProviderError::Transport("reset".into()).status(), None);
    }

    #[test]
    fn display_messages_carry_signal() {
        let err = ProviderError::Status {
            status: 401,
            body: "API key not valid".into(),
        };
        assert_eq!(err.to_string(), "provider returned 401: API key not valid");

        let err = ProviderError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "request timed out after 30s");
    }
}
