//! Metrics module
//!
//! Prometheus metrics for storage backend operations. The binary can dump
//! them in the text exposition format for a node-exporter textfile collector.

use crate::storage::BackendError;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // Store metrics
    pub static ref STORE_TOTAL: CounterVec = register_counter_vec!(
        "squirrelup_store_total",
        "Total number of store operations",
        &["method", "status"]
    ).unwrap();

    pub static ref STORE_BYTES_TOTAL: Counter = register_counter!(
        "squirrelup_store_bytes_total",
        "Total bytes stored"
    ).unwrap();

    pub static ref STORE_DURATION: HistogramVec = register_histogram_vec!(
        "squirrelup_store_duration_seconds",
        "Store duration in seconds",
        &["method"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    ).unwrap();

    // Multipart metrics
    pub static ref MULTIPART_PARTS: Histogram = register_histogram!(
        "squirrelup_multipart_parts",
        "Number of parts per completed multipart upload",
        vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 1000.0]
    ).unwrap();

    pub static ref PART_ATTEMPTS: CounterVec = register_counter_vec!(
        "squirrelup_part_attempts_total",
        "Part upload attempts",
        &["status"]
    ).unwrap();

    // Error metrics
    pub static ref BACKEND_ERRORS: CounterVec = register_counter_vec!(
        "squirrelup_backend_errors_total",
        "Backend errors by kind",
        &["kind"]
    ).unwrap();
}

/// Record a successful store
pub fn record_store_success(method: &str, bytes: u64) {
    STORE_TOTAL.with_label_values(&[method, "success"]).inc();
    STORE_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed store
pub fn record_store_failure(method: &str) {
    STORE_TOTAL.with_label_values(&[method, "failure"]).inc();
}

/// Record store duration
pub fn record_store_duration(method: &str, duration_secs: f64) {
    STORE_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record one part upload attempt
pub fn record_part_attempt(success: bool) {
    let status = if success { "success" } else { "failure" };
    PART_ATTEMPTS.with_label_values(&[status]).inc();
}

/// Record the part count of a completed multipart upload
pub fn record_multipart_parts(parts_count: u32) {
    MULTIPART_PARTS.observe(parts_count as f64);
}

/// Record a backend error
pub fn record_error(error: &BackendError) {
    BACKEND_ERRORS.with_label_values(&[error.kind()]).inc();
}

/// Record an AbortMultipartUpload that did not go through
pub fn record_abort_failure() {
    BACKEND_ERRORS.with_label_values(&["abort_failed"]).inc();
}

/// Encode every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
