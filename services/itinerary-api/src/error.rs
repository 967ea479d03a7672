//! Per-request error type for the itinerary endpoint
//!
//! Every failure becomes a JSON body `{"error": "<user message>"}`. The user
//! message never carries provider detail or which API key failed; the
//! `Display` form (for logs) does.

use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use gemini_pool::mentions_rate_limit;
use thiserror::Error;

pub const SERVICE_BUSY_MESSAGE: &str = "Service busy. Try again in a few minutes.";
pub const GENERATION_FAILED_MESSAGE: &str = "Failed to generate. Please try again.";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Please log in to use AI Planner")]
    Unauthorized,

    #[error("Missing required fields")]
    MissingFields,

    #[error("Time must be between 1 and 12 hours")]
    InvalidHours,

    #[error("Location name too long")]
    LocationTooLong,

    #[error("Invalid companion type")]
    InvalidCompanion,

    #[error("Request limit reached. Try again in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Generation(#[from] gemini_pool::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::MissingFields
            | ApiError::InvalidHours
            | ApiError::LocationTooLong
            | ApiError::InvalidCompanion => StatusCode::BAD_REQUEST,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the end user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Generation(e) => generation_message(e).to_string(),
            other => other.to_string(),
        }
    }
}

/// Exhausted keys, or a fatal error that still reads like a rate limit, ask the
/// user to come back later; everything else is a generic failure.
fn generation_message(error: &gemini_pool::Error) -> &'static str {
    match error {
        gemini_pool::Error::AllCredentialsExhausted { .. } => SERVICE_BUSY_MESSAGE,
        gemini_pool::Error::FatalProvider(e) if mentions_rate_limit(&e.to_string()) => {
            SERVICE_BUSY_MESSAGE
        }
        _ => GENERATION_FAILED_MESSAGE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.user_message() }).to_string();
        let mut response =
            (self.status(), [(CONTENT_TYPE, "application/json")], body).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            response.headers_mut().insert(RETRY_AFTER, retry_after_secs.into());
        }
        response
    }
}
