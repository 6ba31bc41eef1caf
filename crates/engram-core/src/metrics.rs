// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade; no recorder is installed here, so every call
//! is a no-op until the embedding application installs one.

use metrics::{describe_counter, describe_histogram};

/// Register all Engram metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "engram_retrieval_degraded_total",
        "Retrievals that fell back to an empty degraded result"
    );
    describe_histogram!(
        "engram_retrieval_latency_seconds",
        "Backend retrieval latency in seconds"
    );
    describe_counter!(
        "engram_bridge_timeouts_total",
        "Bridged operations that exceeded their timeout"
    );
    describe_counter!(
        "engram_backend_write_retries_total",
        "Backend writes retried after a failure"
    );
}

pub fn record_degraded_retrieval(backend: &str) {
    metrics::counter!("engram_retrieval_degraded_total", "backend" => backend.to_string())
        .increment(1);
}

pub fn record_retrieval_latency(backend: &str, seconds: f64) {
    metrics::histogram!("engram_retrieval_latency_seconds", "backend" => backend.to_string())
        .record(seconds);
}

pub fn record_bridge_timeout(operation: &'static str) {
    metrics::counter!("engram_bridge_timeouts_total", "operation" => operation).increment(1);
}

pub fn record_write_retry(backend: &str) {
    metrics::counter!("engram_backend_write_retries_total", "backend" => backend.to_string())
        .increment(1);
}
