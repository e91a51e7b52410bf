//! Prometheus metrics for the stub daemon.
//!
//! Never on the correctness-critical path; counters are fire-and-forget.

use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, Counter, CounterVec, Encoder, TextEncoder};

lazy_static! {
    /// Total number of requests by plane (management vs data).
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "stub_daddy_requests_total",
        "Total number of HTTP requests received",
        &["plane"]
    )
    .unwrap();

    /// Data-plane requests that matched a stub.
    pub static ref STUB_MATCHES_TOTAL: CounterVec = register_counter_vec!(
        "stub_daddy_stub_matches_total",
        "Total number of requests answered by a registered stub",
        &["method"]
    )
    .unwrap();

    /// Data-plane requests no stub matched.
    pub static ref UNMATCHED_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "stub_daddy_unmatched_requests_total",
        "Total number of data-plane requests no stub matched",
        &["method"]
    )
    .unwrap();

    /// Generator scripts that failed while computing a response.
    pub static ref GENERATOR_FAILURES_TOTAL: Counter = register_counter!(
        "stub_daddy_generator_failures_total",
        "Total number of generator script failures"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format.
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_request(plane: &str) {
    REQUESTS_TOTAL.with_label_values(&[plane]).inc();
}

pub fn record_match(method: &str) {
    STUB_MATCHES_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_unmatched(method: &str) {
    UNMATCHED_REQUESTS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_generator_failure() {
    GENERATOR_FAILURES_TOTAL.inc();
}
