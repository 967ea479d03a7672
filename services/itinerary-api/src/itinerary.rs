//! AI itinerary planner endpoint
//!
//! Validates the planner form, checks the caller's session and allowance,
//! builds the guide prompt and hands it to the rotating generation client.
//! Validation failures never reach the provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use gemini_pool::GenerationClient;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ApiError;
use crate::rate_limit::RateLimiter;
use crate::session::{SessionVerifier, bearer_token};

pub const MIN_HOURS: i64 = 1;
pub const MAX_HOURS: i64 = 12;
pub const MAX_LOCATION_CHARS: usize = 100;

/// Upper bound on sanitized free text.
const MAX_SANITIZED_CHARS: usize = 1000;

/// Shared state for the planner handler
#[derive(Clone)]
pub struct ItineraryState {
    pub client: Arc<GenerationClient>,
    pub sessions: Arc<dyn SessionVerifier>,
    pub limiter: Arc<RateLimiter>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// Who the traveller is going with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Companion {
    Partner,
    Friends,
    Family,
    Solo,
}

impl Companion {
    /// Parse the form value (`girlfriend`, `friends`, `family`, `solo`).
    pub fn from_form(value: &str) -> Option<Self> {
        match value {
            "girlfriend" => Some(Self::Partner),
            "friends" => Some(Self::Friends),
            "family" => Some(Self::Family),
            "solo" => Some(Self::Solo),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Partner => "your romantic partner",
            Self::Friends => "a group of friends",
            Self::Family => "family members",
            Self::Solo => "solo (by yourself)",
        }
    }
}

/// A validated planner request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItineraryRequest {
    pub hours: i64,
    pub companion: Companion,
    pub start_location: String,
}

impl ItineraryRequest {
    /// Parse and validate the JSON body.
    ///
    /// Checks run in a fixed order: presence of all three fields, then hours,
    /// then location length, then companion type. A field that is null, false,
    /// zero or an empty string counts as missing.
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let value: Value = serde_json::from_slice(body).map_err(|_| ApiError::MissingFields)?;
        let field = |name: &str| value.get(name).filter(|v| is_present(v));

        let (Some(time), Some(companion), Some(location)) = (
            field("timeAvailable"),
            field("companionType"),
            field("startLocation"),
        ) else {
            return Err(ApiError::MissingFields);
        };
        let Some(location) = location.as_str() else {
            return Err(ApiError::MissingFields);
        };

        let hours = parse_hours(time)
            .filter(|h| (MIN_HOURS..=MAX_HOURS).contains(h))
            .ok_or(ApiError::InvalidHours)?;

        if location.chars().count() > MAX_LOCATION_CHARS {
            return Err(ApiError::LocationTooLong);
        }

        let companion = companion
            .as_str()
            .and_then(Companion::from_form)
            .ok_or(ApiError::InvalidCompanion)?;

        Ok(Self {
            hours,
            companion,
            start_location: location.to_string(),
        })
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Hours from a number or a string with a leading integer ("3", " 4 hours").
fn parse_hours(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => leading_integer(s),
        _ => None,
    }
}

fn leading_integer(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let magnitude: i64 = digits[..end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Strip markup and script-bearing fragments from free text before it is
/// interpolated into a prompt.
///
/// Passes, in order: remove `<` and `>`, remove `javascript:`, remove
/// `on<word>=` handlers, remove `data:` (all case-insensitive), trim, cap.
pub fn sanitize_location(input: &str) -> String {
    let text: String = input.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    let text = remove_matches(&text, |rest| literal_len(rest, "javascript:"));
    let text = remove_matches(&text, event_handler_len);
    let text = remove_matches(&text, |rest| literal_len(rest, "data:"));
    text.trim().chars().take(MAX_SANITIZED_CHARS).collect()
}

/// Scan left to right, dropping every non-overlapping match.
///
/// `matcher` returns the byte length of an ASCII match at the start of `rest`.
fn remove_matches(input: &str, matcher: impl Fn(&str) -> Option<usize>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while !rest.is_empty() {
        if let Some(len) = matcher(rest) {
            rest = &rest[len..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

fn literal_len(rest: &str, pattern: &str) -> Option<usize> {
    rest.get(..pattern.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(pattern))
        .then_some(pattern.len())
}

/// `on` + one or more word characters + `=`
fn event_handler_len(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    if !bytes.get(..2)?.eq_ignore_ascii_case(b"on") {
        return None;
    }
    let word = bytes[2..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    (word > 0 && bytes.get(2 + word) == Some(&b'=')).then_some(3 + word)
}

/// Local guide prompt for a validated request.
pub fn build_prompt(request: &ItineraryRequest) -> String {
    let location = sanitize_location(&request.start_location);
    format!(
        "You are an expert local travel guide for Vasai-Virar, Maharashtra, India. \
Create a detailed {hours}-hour itinerary for someone traveling with {companion}.

📍 Starting Location: {location}

REQUIREMENTS:
1. Include 2-3 REAL places from Vasai-Virar:
   - Vasai Fort (Portuguese ruins, ocean views)
   - Arnala Beach (peaceful beach, seafood)
   - Tungareshwar Temple (forest trek, hilltop temple)
   - Global Vipassana Pagoda (meditation center)
   - Local markets (Virar Market, Vasai Market)
   - Popular cafes and restaurants

2. For EACH place provide:
   📍 Place name
   🕐 Specific timing (e.g., 9:00 AM - 10:30 AM)
   🎯 Activities (be specific and exciting)
   💰 Cost in ₹ (realistic prices)
   🚗 Travel time and transport method

3. Match companion type:
   - Romantic partner: romantic spots, cafes, sunset views
   - Friends: fun activities, street food
   - Family: safe, all-ages friendly
   - Solo: peaceful spots, photography

4. Format clearly with emojis and sections

5. End with 3-4 practical tips for Vasai-Virar

6. Keep total cost ₹500-2000 range

Make it exciting and authentic! Use conversational tone.",
        hours = request.hours,
        companion = request.companion.description(),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ItineraryResponse {
    success: bool,
    itinerary: String,
    generated_at: String,
}

/// Handle `POST /api/generate-itinerary`.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn generate_itinerary(
    state: &ItineraryState,
    headers: &HeaderMap,
    body: &[u8],
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    let mut response = match plan(state, headers, body).await {
        Ok(itinerary) => {
            let body = ItineraryResponse {
                success: true,
                itinerary,
                generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            if let ApiError::Generation(inner) = &e {
                crate::metrics::record_generation_failure(inner.kind());
            }
            e.into_response()
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    crate::metrics::record_request(response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

async fn plan(
    state: &ItineraryState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<String, ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let user = match state.sessions.verify(token).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            debug!("no valid session");
            return Err(ApiError::Unauthorized);
        }
        Err(e) => {
            warn!(error = %e, "session verification failed");
            return Err(ApiError::Unauthorized);
        }
    };

    let request =
        ItineraryRequest::parse(body).inspect_err(|e| debug!(error = %e, "rejected"))?;

    // Only a delivered itinerary uses up the allowance.
    let reservation = state
        .limiter
        .reserve(&user.id)
        .map_err(|limited| ApiError::RateLimited {
            retry_after_secs: limited.retry_after_secs,
        })?;

    info!(
        user_id = %user.id,
        email = user.email.as_deref().unwrap_or("-"),
        hours = request.hours,
        companion = ?request.companion,
        "generating itinerary"
    );

    let prompt = build_prompt(&request);
    state.client.generate(&prompt).await.map_err(|e| {
        error!(user_id = %user.id, kind = e.kind(), error = %e, "itinerary generation failed");
        state.limiter.refund(&user.id, reservation);
        ApiError::Generation(e)
    })
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;
    use crate::session::StaticSessionVerifier;
    use common::Secret;
    use gemini_pool::CredentialPool;
    use provider::ProviderError;
    use std::time::Duration;

    fn valid_body() -> &'static [u8] {
        br#"{"timeAvailable":"4","companionType":"friends","startLocation":"Virar Station"}"#
    }

    fn parse(json: &str) -> Result<ItineraryRequest, ApiError> {
        ItineraryRequest::parse(json.as_bytes())
    }

    #[test]
    fn parses_valid_request() {
        let request = ItineraryRequest::parse(valid_body()).unwrap();
        assert_eq!(
            request,
            ItineraryRequest {
                hours: 4,
                companion: Companion::Friends,
                start_location: "Virar Station".into(),
            }
        );
    }

    #[test]
    fn hours_accept_numbers_and_integer_prefixes() {
        for (time, hours) in [("6", 6), ("\"12\"", 12), ("\" 3 hours\"", 3), ("2.9", 2)] {
            let json = format!(
                r#"{{"timeAvailable":{time},"companionType":"solo","startLocation":"Vasai"}}"#
            );
            assert_eq!(parse(&json).unwrap().hours, hours, "timeAvailable = {time}");
        }
    }

    #[test]
    fn missing_or_empty_fields() {
        for json in [
            "not json",
            "[]",
            r#"{"companionType":"solo","startLocation":"Vasai"}"#,
            r#"{"timeAvailable":3,"companionType":"","startLocation":"Vasai"}"#,
            r#"{"timeAvailable":0,"companionType":"solo","startLocation":"Vasai"}"#,
            r#"{"timeAvailable":3,"companionType":"solo","startLocation":null}"#,
            r#"{"timeAvailable":3,"companionType":"solo","startLocation":42}"#,
        ] {
            assert!(
                matches!(parse(json), Err(ApiError::MissingFields)),
                "expected missing fields for {json}"
            );
        }
    }

    #[test]
    fn hours_out_of_range_or_unparsable() {
        for time in ["13", "\"0\"", "-2", "\"soon\"", "true"] {
            let json = format!(
                r#"{{"timeAvailable":{time},"companionType":"solo","startLocation":"Vasai"}}"#
            );
            assert!(
                matches!(parse(&json), Err(ApiError::InvalidHours)),
                "expected invalid hours for {time}"
            );
        }
    }

    #[test]
    fn location_length_counts_characters() {
        let at_limit = "ब".repeat(MAX_LOCATION_CHARS);
        let json = format!(
            r#"{{"timeAvailable":2,"companionType":"solo","startLocation":"{at_limit}"}}"#
        );
        assert!(parse(&json).is_ok());

        let too_long = "x".repeat(MAX_LOCATION_CHARS + 1);
        let json = format!(
            r#"{{"timeAvailable":2,"companionType":"solo","startLocation":"{too_long}"}}"#
        );
        assert!(matches!(parse(&json), Err(ApiError::LocationTooLong)));
    }

    #[test]
    fn unknown_companion_rejected_after_other_checks() {
        let json = r#"{"timeAvailable":2,"companionType":"coworkers","startLocation":"Vasai"}"#;
        assert!(matches!(parse(json), Err(ApiError::InvalidCompanion)));

        let json = r#"{"timeAvailable":20,"companionType":"coworkers","startLocation":"Vasai"}"#;
        assert!(matches!(parse(json), Err(ApiError::InvalidHours)));
    }

    #[test]
    fn sanitize_strips_markup_and_script_fragments() {
        assert_eq!(sanitize_location("  Vasai Fort  "), "Vasai Fort");
        assert_eq!(
            sanitize_location("<script>alert(1)</script>"),
            "scriptalert(1)/script"
        );
        assert_eq!(sanitize_location("JavaScript:alert(1)"), "alert(1)");
        assert_eq!(sanitize_location("img onerror=x ONCLICK=y"), "img x y");
        assert_eq!(sanitize_location("DATA:text/html"), "text/html");
        assert_eq!(sanitize_location("on= stays"), "on= stays");
        assert_eq!(sanitize_location("Nalasopara पूर्व"), "Nalasopara पूर्व");
    }

    #[test]
    fn sanitize_caps_length() {
        assert_eq!(sanitize_location(&"a".repeat(5000)).len(), MAX_SANITIZED_CHARS);
    }

    #[test]
    fn prompt_carries_request_details() {
        let prompt = build_prompt(&ItineraryRequest {
            hours: 5,
            companion: Companion::Partner,
            start_location: "<b>Arnala</b>".into(),
        });
        assert!(prompt.contains("detailed 5-hour itinerary"));
        assert!(prompt.contains("traveling with your romantic partner"));
        assert!(prompt.contains("Starting Location: bArnala/b"));
        assert!(!prompt.contains('<'));
    }

    fn state_with(
        provider: Arc<ScriptedProvider>,
        keys: usize,
        max_requests: u32,
    ) -> ItineraryState {
        let pool = CredentialPool::new(
            (0..keys)
                .map(|i| Secret::new(format!("key-{i}")))
                .collect(),
        );
        ItineraryState {
            client: Arc::new(GenerationClient::new(pool, provider)),
            sessions: Arc::new(StaticSessionVerifier::single("good-token", "user-1")),
            limiter: Arc::new(RateLimiter::new(max_requests, Duration::from_secs(60))),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    fn authorized() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer good-token"),
        );
        headers
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn success_returns_itinerary_with_timestamp() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("Day plan".into())]));
        let state = state_with(provider.clone(), 2, 3);

        let response =
            generate_itinerary(&state, &authorized(), valid_body(), "req_test".into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req_test");

        let json = json_body(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["itinerary"], "Day plan");
        let generated_at = json["generatedAt"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(generated_at).is_ok());
        assert!(generated_at.ends_with('Z'));

        let prompt = provider.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Virar Station"));
        assert_eq!(state.requests_total.load(Ordering::Relaxed), 1);
        assert_eq!(state.errors_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn unauthenticated_requests_never_reach_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("unused".into())]));
        let state = state_with(provider.clone(), 1, 3);

        let mut wrong = HeaderMap::new();
        wrong.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer stolen"),
        );
        for headers in [HeaderMap::new(), wrong] {
            let response = generate_itinerary(&state, &headers, valid_body(), "req".into()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                json_body(response).await["error"],
                "Please log in to use AI Planner"
            );
        }
        assert_eq!(provider.calls(), 0);
        assert_eq!(state.errors_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("unused".into())]));
        let state = state_with(provider.clone(), 1, 3);
        let body = br#"{"timeAvailable":13,"companionType":"solo","startLocation":"Vasai"}"#;

        let response = generate_itinerary(&state, &authorized(), body, "req".into()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await["error"],
            "Time must be between 1 and 12 hours"
        );
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_requests_do_not_consume_allowance() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("plan".into())]));
        let state = state_with(provider.clone(), 1, 1);
        let bad = br#"{"timeAvailable":"x","companionType":"solo","startLocation":"Vasai"}"#;

        let response = generate_itinerary(&state, &authorized(), bad, "req".into()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn failed_generation_does_not_consume_allowance() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Status {
                status: 429,
                body: "quota exceeded".into(),
            }),
            Ok("plan".into()),
        ]));
        let state = state_with(provider.clone(), 1, 1);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(provider.calls(), 2);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_keys_report_service_busy() {
        let quota = || {
            Err(ProviderError::Status {
                status: 429,
                body: "quota exceeded".into(),
            })
        };
        let provider = Arc::new(ScriptedProvider::new(vec![quota(), quota()]));
        let state = state_with(provider.clone(), 2, 3);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["error"],
            "Service busy. Try again in a few minutes."
        );
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn fatal_error_reports_generic_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Status {
            status: 400,
            body: "API key not valid".into(),
        })]));
        let state = state_with(provider.clone(), 3, 3);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert_eq!(json["error"], "Failed to generate. Please try again.");
        assert!(!json.to_string().contains("key-"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn empty_pool_reports_generic_failure() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let state = state_with(provider.clone(), 0, 3);

        let response = generate_itinerary(&state, &authorized(), valid_body(), "req".into()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["error"],
            "Failed to generate. Please try again."
        );
        assert_eq!(provider.calls(), 0);
    }
}
