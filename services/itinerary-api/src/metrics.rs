//! Prometheus metrics exposition
//!
//! Service metrics:
//!
//! - `itinerary_requests_total` (counter): label `status`
//! - `itinerary_request_duration_seconds` (histogram): label `status`
//! - `itinerary_generation_failures_total` (counter): label `kind`
//!
//! The generation client adds `generation_attempts_total` and
//! `generation_requests_total` through the same global recorder.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "itinerary_request_duration_seconds";

/// Bucket boundaries from 5ms to 60s; a generation call can take several
/// seconds per key.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed itinerary request.
pub fn record_request(status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("itinerary_requests_total", "status" => status_str.clone()).increment(1);
    metrics::histogram!(DURATION_METRIC, "status" => status_str).record(duration_secs);
}

/// Record a failed generation by error kind.
pub fn record_generation_failure(kind: &'static str) {
    metrics::counter!("itinerary_generation_failures_total", "kind" => kind).increment(1);
}
