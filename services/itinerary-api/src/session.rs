//! Session verification against the hosted auth backend
//!
//! The planner endpoint only serves signed-in users. The browser sends the
//! Supabase access token as a bearer token; we ask Supabase who it belongs to.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use axum::http::HeaderMap;
use common::Secret;
use serde::Deserialize;
use tracing::debug;

/// Authenticated user behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Failures talking to the auth backend (not "no session").
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("auth request failed: {0}")]
    Http(String),

    #[error("auth backend returned {0}")]
    Backend(u16),

    #[error("invalid user response: {0}")]
    InvalidResponse(String),
}

/// Resolves an access token to a user.
///
/// `Ok(None)` means the token is missing, expired or revoked.
pub trait SessionVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SessionUser>, SessionError>> + Send + 'a>>;
}

/// Verifies tokens with `GET {supabase_url}/auth/v1/user`.
pub struct SupabaseSessionVerifier {
    client: reqwest::Client,
    supabase_url: String,
    anon_key: Secret<String>,
    timeout: Duration,
}

impl SupabaseSessionVerifier {
    pub fn new(
        client: reqwest::Client,
        supabase_url: impl Into<String>,
        anon_key: Secret<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            supabase_url: supabase_url.into(),
            anon_key,
            timeout,
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<Option<SessionUser>, SessionError> {
        let url = format!("{}/auth/v1/user", self.supabase_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .header("apikey", self.anon_key.expose().as_str())
            .bearer_auth(access_token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SessionError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 => response
                .json::<SessionUser>()
                .await
                .map(Some)
                .map_err(|e| SessionError::InvalidResponse(e.to_string())),
            401 | 403 => {
                debug!(status, "access token rejected");
                Ok(None)
            }
            other => Err(SessionError::Backend(other)),
        }
    }
}

impl SessionVerifier for SupabaseSessionVerifier {
    fn verify<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SessionUser>, SessionError>> + Send + 'a>> {
        Box::pin(self.fetch_user(access_token))
    }
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Fixed token → user table for tests.
#[cfg(test)]
pub struct StaticSessionVerifier {
    pub users: Vec<(String, SessionUser)>,
}

#[cfg(test)]
impl StaticSessionVerifier {
    pub fn single(token: &str, user_id: &str) -> Self {
        Self {
            users: vec![(
                token.to_string(),
                SessionUser {
                    id: user_id.to_string(),
                    email: Some(format!("{user_id}@example.com")),
                },
            )],
        }
    }
}

#[cfg(test)]
impl SessionVerifier for StaticSessionVerifier {
    fn verify<'a>(
        &'a self,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SessionUser>, SessionError>> + Send + 'a>> {
        let user = self
            .users
            .iter()
            .find(|(token, _)| token == access_token)
            .map(|(_, user)| user.clone());
        Box::pin(async move { Ok(user) })
    }
}
