// Metrics and observability module
// Process-local metrics about the telemetry pipeline itself: store latency,
// store errors, dropped recordings and failed query groups
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

pub static STORE_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "telemetry_store_op_latency_seconds",
        "latency of counter store calls",
        &["op"]
    )
    .unwrap()
});

pub static STORE_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "telemetry_store_errors_total",
        "counter store failures by operation and kind",
        &["op", "kind"]
    )
    .unwrap()
});

pub static RECORDING_DROPPED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "telemetry_recording_dropped_total",
        "best-effort recordings discarded after a store failure",
        &["stage"]
    )
    .unwrap()
});

pub static QUERY_GROUP_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "telemetry_query_group_failures_total",
        "stats aggregation groups that failed or timed out",
        &["group"]
    )
    .unwrap()
});

/// Render every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buf = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
