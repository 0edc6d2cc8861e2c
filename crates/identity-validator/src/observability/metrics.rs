//! Metrics definitions for the identity validator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `idv_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `issuer`: configured issuer names only, never token-supplied values
//! - `outcome`: success, failure, malformed
//! - `category`: `FailureCategory` variants
//! - `status`: success, error, timeout
//! - `result`: hit, miss, stale, unknown_kid
//! - `endpoint`: known routes, everything else is `/other`

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Token validation is local work plus an occasional key fetch
        .set_buckets_for_metric(
            Matcher::Prefix("idv_auth".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set auth buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("idv_jwks_fetch".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("idv_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Authentication
// ============================================================================

/// Record the overall result of authenticating one token.
///
/// Metric: `idv_auth_requests_total`, `idv_auth_duration_seconds`
/// Labels: `outcome`
pub fn record_auth_outcome(outcome: &str, duration: Duration) {
    histogram!("idv_auth_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
    counter!("idv_auth_requests_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a successful validation by one issuer.
///
/// Metric: `idv_issuer_validations_total`
/// Labels: `issuer`, `result`
pub fn record_issuer_success(issuer: &str) {
    counter!("idv_issuer_validations_total",
        "issuer" => issuer.to_string(),
        "result" => "success"
    )
    .increment(1);
}

/// Record a failed validation attempt by one issuer.
///
/// Metric: `idv_issuer_validations_total`
/// Labels: `issuer`, `result` (the failure category)
pub fn record_issuer_failure(issuer: &str, category: &str) {
    counter!("idv_issuer_validations_total",
        "issuer" => issuer.to_string(),
        "result" => category.to_string()
    )
    .increment(1);
}

// ============================================================================
// Key Material
// ============================================================================

/// Record a JWKS fetch attempt.
///
/// Metric: `idv_jwks_fetch_total`, `idv_jwks_fetch_duration_seconds`
/// Labels: `issuer`, `status`
pub fn record_jwks_fetch(issuer: &str, status: &str, duration: Duration) {
    histogram!("idv_jwks_fetch_duration_seconds",
        "issuer" => issuer.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("idv_jwks_fetch_total",
        "issuer" => issuer.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a key cache lookup.
///
/// Metric: `idv_key_cache_lookups_total`
/// Labels: `issuer`, `result`
pub fn record_key_cache_lookup(issuer: &str, result: &str) {
    counter!("idv_key_cache_lookups_total",
        "issuer" => issuer.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

// ============================================================================
// HTTP
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `idv_http_requests_total`, `idv_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status_code`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);

    histogram!("idv_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => categorize_status_code(status_code)
    )
    .record(duration.as_secs_f64());

    counter!("idv_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/v1/health" => "/v1/health",
        "/metrics" => "/metrics",
        "/v1/me" => "/v1/me",
        "/v1/admin" => "/v1/admin",
        "/v1/diagnostics/issuers" => "/v1/diagnostics/issuers",
        "/v1/dev/token" => "/v1/dev/token",
        _ => "/other",
    }
}
