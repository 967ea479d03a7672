//! Quota detection for provider errors
//!
//! Decides whether a failed attempt should move on to the next API key
//! (Transient) or end the call (Fatal). The rule is a trait so the rotation
//! loop can be tested with any classification.

use provider::{ErrorClassification, ProviderError};

/// Substrings that mark a quota or rate-limit failure.
///
/// Gemini reports exhausted keys as HTTP 429 with status
/// `RESOURCE_EXHAUSTED` and a message mentioning quota.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "quota",
    "limit",
    "429",
    "resource_exhausted",
    "resource exhausted",
];

/// Maps a provider error to Transient (try next key) or Fatal (stop).
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &ProviderError) -> ErrorClassification;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&ProviderError) -> ErrorClassification + Send + Sync,
{
    fn classify(&self, error: &ProviderError) -> ErrorClassification {
        self(error)
    }
}

/// Default classifier.
///
/// - HTTP 429 → Transient
/// - timeout → Transient (a hung key is as useless as an exhausted one)
/// - message mentions quota/limit/429 → Transient
/// - everything else (401/403, 400, 5xx, blocked, transport) → Fatal
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotaKeywordClassifier;

impl ErrorClassifier for QuotaKeywordClassifier {
    fn classify(&self, error: &ProviderError) -> ErrorClassification {
        if error.status() == Some(429)
            || matches!(error, ProviderError::Timeout(_))
            || mentions_rate_limit(&error.to_string())
        {
            ErrorClassification::Transient
        } else {
            ErrorClassification::Fatal
        }
    }
}

/// True if `message` carries a quota or rate-limit signal (case-insensitive).
pub fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(status: u16, body: &str) -> ProviderError {
        ProviderError::Status {
            status,
            body: body.into(),
        }
    }

    fn classify(error: &ProviderError) -> ErrorClassification {
        QuotaKeywordClassifier.classify(error)
    }

    #[test]
    fn status_429_is_transient_even_with_empty_body() {
        assert_eq!(classify(&status(429, "")), ErrorClassification::Transient);
    }

    #[test]
    fn gemini_resource_exhausted_is_transient() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(classify(&status(429, body)), ErrorClassification::Transient);
    }

    #[test]
    fn quota_message_on_other_status_is_transient() {
        assert_eq!(
            classify(&status(403, "Quota exceeded for quota metric 'Generate Content'")),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn resource_exhausted_without_429_is_transient() {
        assert_eq!(
            classify(&status(400, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#)),
            ErrorClassification::Transient
        );
        assert_eq!(
            classify(&status(500, "Resource exhausted, retry later")),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn limit_keyword_is_case_insensitive() {
        assert_eq!(
            classify(&status(400, "Rate LIMIT reached")),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn timeout_is_transient() {
        assert_eq!(
            classify(&ProviderError::Timeout(Duration::from_secs(30))),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn auth_failure_is_fatal() {
        assert_eq!(
            classify(&status(400, "API key not valid. Please pass a valid API key.")),
            ErrorClassification::Fatal
        );
        assert_eq!(
            classify(&status(401, "unauthenticated")),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn outage_and_transport_are_fatal() {
        assert_eq!(
            classify(&status(503, "The model is overloaded")),
            ErrorClassification::Fatal
        );
        assert_eq!(
            classify(&ProviderError::Transport("connection refused".into())),
            ErrorClassification::Fatal
        );
        assert_eq!(
            classify(&ProviderError::Blocked("SAFETY".into())),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn closures_are_classifiers() {
        let everything_fatal = |_: &ProviderError| ErrorClassification::Fatal;
        assert_eq!(
            everything_fatal.classify(&status(429, "quota")),
            ErrorClassification::Fatal
        );
    }

    #[test]
    fn mentions_rate_limit_patterns() {
        assert!(mentions_rate_limit("All API keys exhausted: quota"));
        assert!(mentions_rate_limit("HTTP 429"));
        assert!(!mentions_rate_limit("permission denied"));
    }
}
