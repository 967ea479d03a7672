//! Rotating generation client
//!
//! Tries keys from the pool in round-robin order until one succeeds, a fatal
//! error occurs, or every key has failed with a quota error. Attempts are
//! strictly sequential and there is no delay between them: moving to a key
//! with its own quota bucket is the retry.

use std::sync::Arc;
use std::time::Duration;

use provider::{ErrorClassification, GenerationProvider, ProviderError};
use tracing::{error, info, instrument, warn};

use crate::error::{Error, Result};
use crate::pool::{CredentialPool, RotationCursor};
use crate::quota::{ErrorClassifier, QuotaKeywordClassifier};

/// Generation client owning a credential pool and its rotation cursor.
///
/// Share one instance (behind `Arc`) to spread load across concurrent
/// callers; construct separate instances for independent rotation.
pub struct GenerationClient {
    pool: CredentialPool,
    cursor: RotationCursor,
    provider: Arc<dyn GenerationProvider>,
    classifier: Arc<dyn ErrorClassifier>,
    attempt_timeout: Option<Duration>,
}

impl GenerationClient {
    /// Client with the default quota classifier, a fresh cursor and no
    /// per-attempt timeout beyond the provider's own.
    pub fn new(pool: CredentialPool, provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            pool,
            cursor: RotationCursor::new(),
            provider,
            classifier: Arc::new(QuotaKeywordClassifier),
            attempt_timeout: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_cursor(mut self, cursor: RotationCursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Bound each provider call; an elapsed attempt fails with `ProviderError::Timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn cursor(&self) -> &RotationCursor {
        &self.cursor
    }

    /// Generate a completion for `prompt`.
    ///
    /// Makes at most one provider call per key and stops at the first success.
    /// The cursor advances once per attempt whatever the outcome.
    #[instrument(skip_all, fields(provider = self.provider.id(), credentials = self.pool.len()))]
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let n = self.pool.len();
        if n == 0 {
            error!("generation requested with no API keys configured");
            record_request("no_credentials");
            return Err(Error::NoCredentialsConfigured);
        }

        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..n {
            let Some(slot) = self.cursor.advance(n) else {
                break;
            };
            let Some(key) = self.pool.get(slot) else {
                break;
            };

            match self.attempt(key.expose(), prompt).await {
                Ok(text) => {
                    info!(slot, attempt, "generation succeeded");
                    record_attempt("success");
                    record_request("success");
                    return Ok(text);
                }
                Err(e) => match self.classifier.classify(&e) {
                    ErrorClassification::Transient => {
                        warn!(slot, attempt, error = %e, "API key rate limited, trying next key");
                        record_attempt("transient");
                        last_error = Some(e);
                    }
                    ErrorClassification::Fatal => {
                        error!(slot, attempt, error = %e, "generation failed with non-quota error");
                        record_attempt("fatal");
                        record_request("fatal");
                        return Err(Error::FatalProvider(e));
                    }
                },
            }
        }

        error!(attempts = n, "all API keys exhausted");
        record_request("exhausted");
        Err(Error::AllCredentialsExhausted {
            attempts: n,
            last: last_error
                .unwrap_or_else(|| ProviderError::InvalidResponse("no attempt made".into())),
        })
    }

    async fn attempt(&self, api_key: &str, prompt: &str) -> provider::Result<String> {
        let call = self.provider.generate(api_key, prompt);
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ProviderError::Timeout(limit))),
            None => call.await,
        }
    }

    /// Pool summary for the health endpoint. Never includes keys.
    pub fn health(&self) -> serde_json::Value {
        let total = self.pool.len();
        serde_json::json!({
            "status": if total > 0 { "healthy" } else { "unhealthy" },
            "provider": self.provider.id(),
            "credentials_total": total,
            "next_credential": self.cursor.position(total),
        })
    }
}

fn record_attempt(outcome: &'static str) {
    metrics::counter!("generation_attempts_total", "outcome" => outcome).increment(1);
}

fn record_request(result: &'static str) {
    metrics::counter!("generation_requests_total", "result" => result).increment(1);
}
