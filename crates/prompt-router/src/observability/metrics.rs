//! Metrics definitions for the Prompt Router.
//!
//! All metrics follow Prometheus naming conventions:
//! - `router_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: admission outcome codes (queued plus the error codes)
//! - `status_code`: HTTP status codes the handler can emit
//! - `endpoint`: 3 known paths plus `/other`
//! - `status`: success, error (timeout for HTTP)
//! - `backend`: http, redis, memory, mock

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Admission includes a possible key-set refresh and a queue round trip
        .set_buckets_for_metric(
            Matcher::Full("router_request_duration_seconds".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set admission buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("router_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `router_http_requests_total`, `router_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status` / `status_code`
///
/// Captures framework-level rejections (404, 405, 408) as well as handler
/// responses.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("router_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("router_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to bound label cardinality.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/v1/prompts" => "/v1/prompts",
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}

// ============================================================================
// Admission Metrics
// ============================================================================

/// Record one admission attempt.
///
/// Metric: `router_requests_total`, `router_request_duration_seconds`
/// Labels: `outcome` (e.g. `queued`, `token_expired`), `status_code`
pub fn record_admission(outcome: &'static str, status_code: u16, duration: Duration) {
    histogram!("router_request_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());

    counter!("router_requests_total",
        "outcome" => outcome,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

// ============================================================================
// Dependency Metrics
// ============================================================================

/// Record a key-set refresh attempt.
///
/// Metric: `router_jwks_refresh_total`
/// Labels: `status` (success, error)
pub fn record_jwks_refresh(status: &'static str) {
    counter!("router_jwks_refresh_total", "status" => status).increment(1);
}

/// Record a queue publish attempt.
///
/// Metric: `router_enqueue_total`
/// Labels: `backend`, `status` (success, error)
pub fn record_enqueue(backend: &'static str, status: &'static str) {
    counter!("router_enqueue_total", "backend" => backend, "status" => status).increment(1);
}
