//! Prometheus metrics for the timer service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `timer_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP methods
//! - `endpoint`: the fixed route set, everything else is `/other`
//! - `status`: success, error, timeout
//! - `role`: controller, display
//! - `action`: the eight action names
//! - `outcome`, `reason`: bounded by code
//!
//! Session codes never appear as label values.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::time::Duration;

/// HTTP request latency buckets, seconds.
const HTTP_REQUEST_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000,
];

fn builder() -> Result<PrometheusBuilder, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("timer_http_request".to_string()),
            HTTP_REQUEST_BUCKETS,
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))
}

/// Build a recorder without installing it globally, for tests that need
/// a `/metrics` handle.
pub fn build_recorder() -> Result<PrometheusRecorder, String> {
    Ok(builder()?.build_recorder())
}

/// Install the Prometheus recorder globally and return the handle
/// used by the `/metrics` endpoint.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    builder()?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion.
///
/// Metric: `timer_http_requests_total`, `timer_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("timer_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("timer_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        // 101 is the WebSocket upgrade
        101 | 200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/api/session" => "/api/session",
        "/api/health" => "/api/health",
        "/ws" => "/ws",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}

// ============================================================================
// Session Lifecycle Metrics
// ============================================================================

/// Metric: `timer_sessions_created_total`
pub fn record_session_created() {
    counter!("timer_sessions_created_total").increment(1);
}

/// Metric: `timer_sessions_ended_total`
/// Labels: `reason` (ended, expired, shutdown)
pub fn record_session_ended(reason: &'static str) {
    counter!("timer_sessions_ended_total", "reason" => reason).increment(1);
}

/// Metric: `timer_sessions_active`
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions_active(count: usize) {
    gauge!("timer_sessions_active").set(count as f64);
}

// ============================================================================
// Real-time Protocol Metrics
// ============================================================================

/// Metric: `timer_joins_total`
/// Labels: `role`, `outcome` (admitted, not_found, unauthorized, conflict, error)
pub fn record_join(role: &'static str, outcome: &'static str) {
    counter!("timer_joins_total", "role" => role, "outcome" => outcome).increment(1);
}

/// Metric: `timer_actions_total`
/// Labels: `action`, `outcome` (applied, unchanged, ignored, ended)
pub fn record_action(action: &'static str, outcome: &'static str) {
    counter!("timer_actions_total", "action" => action, "outcome" => outcome).increment(1);
}

/// Metric: `timer_ws_connections`
pub fn ws_connection_opened() {
    gauge!("timer_ws_connections").increment(1.0);
}

/// Metric: `timer_ws_connections`
pub fn ws_connection_closed() {
    gauge!("timer_ws_connections").decrement(1.0);
}

/// Metric: `timer_broadcast_send_failures_total`
pub fn record_send_failure() {
    counter!("timer_broadcast_send_failures_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the no-op global recorder; values are checked in
    // the integration tests through the /metrics endpoint.

    #[test]
    fn test_record_functions_do_not_panic() {
        record_http_request("GET", "/api/health", 200, Duration::from_millis(2));
        record_http_request("POST", "/api/session", 400, Duration::from_millis(3));
        record_http_request("GET", "/nope", 404, Duration::from_millis(1));
        record_session_created();
        record_session_ended("ended");
        set_sessions_active(3);
        record_join("controller", "admitted");
        record_action("start", "applied");
        ws_connection_opened();
        ws_connection_closed();
        record_send_failure();
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(101), "success");
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(400), "error");
        assert_eq!(categorize_status_code(503), "error");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/api/session"), "/api/session");
        assert_eq!(normalize_endpoint("/api/health"), "/api/health");
        assert_eq!(normalize_endpoint("/ws"), "/ws");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/display"), "/other");
        assert_eq!(normalize_endpoint("/api/session/ABC234"), "/other");
    }

    #[test]
    fn test_build_recorder_is_not_global() {
        let first = build_recorder();
        let second = build_recorder();
        assert!(first.is_ok());
        assert!(second.is_ok());
    }
}
