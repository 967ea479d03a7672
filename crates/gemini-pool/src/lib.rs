//! Credential-rotating generation client for the Gemini API
//!
//! Holds a fixed pool of API keys and spreads prompts across them round-robin.
//! A quota or rate-limit failure on one key moves on to the next key right
//! away; any other failure stops the call.
//!
//! Call lifecycle:
//! 1. `CredentialPool` is built once from configuration at startup
//! 2. `GenerationClient::generate` takes the key at the `RotationCursor` and advances it
//! 3. Provider succeeds → completion returned, no further attempts
//! 4. `ErrorClassifier` says Transient → next key, no delay
//! 5. `ErrorClassifier` says Fatal → error returned immediately
//! 6. Every key failed transiently → `Error::AllCredentialsExhausted`

pub mod client;
pub mod error;
pub mod pool;
pub mod quota;

pub use client::GenerationClient;
pub use error::{Error, Result};
pub use pool::{CredentialPool, RotationCursor};
pub use quota::{ErrorClassifier, QuotaKeywordClassifier, mentions_rate_limit};
