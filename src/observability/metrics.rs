//! Gateway metrics.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, stage
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_decisions_total` (counter): policy decisions by outcome, source
//! - `gateway_rate_limited_total` (counter): rejected by the rate limiter
//! - `gateway_rate_limit_fail_open_total` (counter): store errors skipped
//! - `gateway_rule_anomalies_total` (counter): malformed rule content at runtime
//! - `gateway_audit_failures_total` (counter): audit sink write failures
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; without an installed recorder
//!   every call is a no-op
//! - Rate-limit keys are not used as labels (unbounded cardinality)

use std::time::Instant;

/// Record one finished request.
pub fn record_request(method: &str, status: u16, stage: &str, start: Instant) {
    let status = status.to_string();
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status,
        "stage" => stage.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// `source` is "rule", "default" or "repository_error".
pub fn record_decision(decision: &str, source: &'static str) {
    metrics::counter!(
        "gateway_decisions_total",
        "decision" => decision.to_string(),
        "source" => source
    )
    .increment(1);
}

pub fn record_rate_limited(key: &str) {
    tracing::debug!(key = %key, "Rate limit exceeded");
    metrics::counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_rate_limit_fail_open() {
    metrics::counter!("gateway_rate_limit_fail_open_total").increment(1);
}

pub fn record_rule_anomaly(kind: &'static str) {
    metrics::counter!("gateway_rule_anomalies_total", "kind" => kind).increment(1);
}

pub fn record_audit_failure() {
    metrics::counter!("gateway_audit_failures_total").increment(1);
}
