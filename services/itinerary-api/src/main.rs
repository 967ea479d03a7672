//! Itinerary API
//!
//! Single-binary Rust service that:
//! 1. Verifies the caller's session with the auth backend
//! 2. Validates the AI planner form and enforces a per-user allowance
//! 3. Generates the itinerary through a rotating pool of Gemini API keys
//! 4. Exposes health and Prometheus metrics endpoints

mod config;
mod error;
mod itinerary;
mod metrics;
mod rate_limit;
mod session;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gemini_pool::{CredentialPool, GenerationClient};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::gemini::GeminiProvider;

use crate::config::Config;
use crate::itinerary::ItineraryState;
use crate::rate_limit::RateLimiter;
use crate::session::SupabaseSessionVerifier;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for session lookups against the auth backend.
const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    itinerary: ItineraryState,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/generate-itinerary", post(itinerary_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting itinerary-api");

    // Install before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        model = %config.gemini.model,
        api_keys = config.gemini.api_keys.len(),
        rate_limit = config.rate_limit.max_requests,
        "configuration loaded"
    );

    let pool = CredentialPool::new(config.gemini.api_keys);
    if pool.is_empty() {
        warn!("no Gemini API keys configured, every generation request will fail");
    }

    let http = reqwest::Client::new();
    let attempt_timeout = Duration::from_secs(config.gemini.timeout_secs);
    let provider = GeminiProvider::new(
        http.clone(),
        config.gemini.base_url,
        config.gemini.model,
        attempt_timeout,
    );
    let client = GenerationClient::new(pool, Arc::new(provider))
        .with_attempt_timeout(attempt_timeout);

    let anon_key = config
        .auth
        .anon_key
        .context("Supabase anon key missing after config load")?;
    let sessions =
        SupabaseSessionVerifier::new(http, config.auth.supabase_url, anon_key, SESSION_TIMEOUT);

    let app_state = AppState {
        itinerary: ItineraryState {
            client: Arc::new(client),
            sessions: Arc::new(sessions),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_secs(config.rate_limit.window_secs),
            )),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        },
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };

    let listen_addr = config.server.listen_addr;
    let app = build_router(app_state, config.server.max_connections);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => info!("all in-flight requests drained"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "server task panicked"),
        Err(_) => warn!(
            drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "drain timeout exceeded, forcing shutdown"
        ),
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: uptime, request counters and the key pool summary.
/// Returns 200 when at least one API key is configured, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let itinerary = &state.itinerary;
    let status_code = if itinerary.client.pool().is_empty() {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    } else {
        axum::http::StatusCode::OK
    };
    let body = serde_json::json!({
        "status": if status_code.is_success() { "healthy" } else { "degraded" },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "requests_served": itinerary.requests_total.load(Ordering::Relaxed),
        "errors_total": itinerary.errors_total.load(Ordering::Relaxed),
        "tracked_users": itinerary.limiter.tracked(),
        "generation": itinerary.client.health(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn itinerary_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    itinerary::generate_itinerary(&state.itinerary, &headers, &body, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
