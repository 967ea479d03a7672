//! Error types for generation calls

use provider::ProviderError;

/// Terminal outcomes of a failed `GenerationClient::generate` call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pool is empty; nothing was attempted.
    #[error("no API keys configured")]
    NoCredentialsConfigured,

    /// Every key failed with a transient (quota) error.
    #[error("all {attempts} API keys exhausted: {last}")]
    AllCredentialsExhausted {
        attempts: usize,
        last: ProviderError,
    },

    /// A non-quota error stopped the rotation.
    #[error("generation failed: {0}")]
    FatalProvider(ProviderError),
}

impl Error {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoCredentialsConfigured => "no_credentials",
            Error::AllCredentialsExhausted { .. } => "exhausted",
            Error::FatalProvider(_) => "fatal",
        }
    }
}

/// Result alias for generation calls.
pub type Result<T> = std::result::Result<T, Error>;
