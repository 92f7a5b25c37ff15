//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "blocks_indexed_total",
        "Total number of blocks fully processed and committed"
    );
    describe_counter!(
        "fetch_retries_total",
        "Total number of block fetches that failed and were retried"
    );
    describe_counter!(
        "handler_invocations_total",
        "Total number of handler invocations"
    );
    describe_counter!(
        "checkpoints_recorded_total",
        "Total number of checkpoint records written"
    );
    describe_counter!(
        "sources_instantiated_total",
        "Total number of sources instantiated from templates at runtime"
    );
    describe_histogram!(
        "block_processing_duration_seconds",
        "Time taken to process a block in seconds"
    );
}

/// Record a fully processed block.
pub fn record_block_indexed() {
    counter!("blocks_indexed_total").increment(1);
}

/// Record a failed fetch that will be retried.
pub fn record_fetch_retry() {
    counter!("fetch_retries_total").increment(1);
}

/// Record a handler invocation.
///
/// # Arguments
/// * `handler` - The handler id
pub fn record_handler_invocation(handler: &str) {
    counter!("handler_invocations_total", "handler" => handler.to_string()).increment(1);
}

/// Record checkpoint rows written for a block.
pub fn record_checkpoints(count: u64) {
    counter!("checkpoints_recorded_total").increment(count);
}

/// Record a template instantiation.
pub fn record_source_instantiated() {
    counter!("sources_instantiated_total").increment(1);
}

/// Record block processing duration.
pub fn record_block_processing_duration(duration_secs: f64) {
    histogram!("block_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_block_processing_duration(duration);
    }
}
