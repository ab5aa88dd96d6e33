// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Replicated, skipped and failed posts per driver
//! - Delivery latency and flood waits
//! - Degraded media transforms
//! - Poll cycles and backfill pages
//! - Store busy retries
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use channel_mirror::metrics;
//! use std::time::Duration;
//!
//! // After a post reached the destination
//! metrics::record_transfer("realtime", 3);
//!
//! // After a send round trip
//! metrics::record_delivery_latency("photo", Duration::from_millis(420));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a replicated post.
pub fn record_transfer(driver: &str, connection_id: i64) {
    counter!(
        "mirror_transfers_total",
        "driver" => driver.to_string(),
        "connection_id" => connection_id.to_string()
    )
    .increment(1);
}

/// Record a post skipped because it was already mapped (or claimed by another driver).
pub fn record_duplicate(driver: &str) {
    counter!("mirror_duplicates_total", "driver" => driver.to_string()).increment(1);
}

/// Record a post that could not be mirrored.
pub fn record_failure(driver: &str, error_kind: &str) {
    counter!(
        "mirror_failures_total",
        "driver" => driver.to_string(),
        "error_kind" => error_kind.to_string()
    )
    .increment(1);
}

/// Record a post whose content kind is not mirrored.
pub fn record_unsupported(kind: &str) {
    counter!("mirror_unsupported_total", "kind" => kind.to_string()).increment(1);
}

/// Record send latency by payload kind.
pub fn record_delivery_latency(kind: &str, duration: Duration) {
    histogram!("mirror_delivery_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a flood wait slept before a retry.
pub fn record_rate_limit_wait(operation: &str, wait: Duration) {
    counter!("mirror_rate_limit_waits_total", "operation" => operation.to_string()).increment(1);
    histogram!("mirror_rate_limit_wait_seconds", "operation" => operation.to_string())
        .record(wait.as_secs_f64());
}

/// Record a transform that fell back to the original media.
pub fn record_transform_degraded(kind: &str) {
    counter!("mirror_transform_degraded_total", "kind" => kind.to_string()).increment(1);
}

/// Record transform duration by payload kind.
pub fn record_transform_latency(kind: &str, duration: Duration) {
    histogram!("mirror_transform_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a realtime event dispatched to matching connections.
pub fn record_event_received(matched_connections: usize) {
    counter!("mirror_events_received_total").increment(1);
    if matched_connections == 0 {
        counter!("mirror_events_unmatched_total").increment(1);
    }
}

/// Record a completed poll cycle.
pub fn record_poll_cycle(connections: usize, transferred: usize, duration: Duration) {
    counter!("mirror_poll_cycles_total").increment(1);
    counter!("mirror_poll_transfers_total").increment(transferred as u64);
    gauge!("mirror_restricted_connections").set(connections as f64);
    histogram!("mirror_poll_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record one backfill history page.
pub fn record_backfill_page(connection_id: i64, posts: usize) {
    counter!("mirror_backfill_pages_total", "connection_id" => connection_id.to_string()).increment(1);
    histogram!("mirror_backfill_page_size").record(posts as f64);
}

/// Record a finished backfill run.
pub fn record_backfill_complete(connection_id: i64, transferred: usize, duration: Duration) {
    counter!(
        "mirror_backfill_transferred_total",
        "connection_id" => connection_id.to_string()
    )
    .increment(transferred as u64);
    histogram!("mirror_backfill_duration_seconds").record(duration.as_secs_f64());
}

/// Record store SQLite retry (for SQLITE_BUSY/SQLITE_LOCKED).
pub fn store_retries_total(operation: &str) {
    counter!("mirror_store_retries_total", "operation" => operation.to_string()).increment(1);
}

/// Gauge for posts currently moving through the pipeline.
pub fn set_in_flight(count: usize) {
    gauge!("mirror_in_flight").set(count as f64);
}

/// Gauge for engine state.
pub fn set_engine_state(state: &str) {
    // Encode state as numeric for alerting
    let value = match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        "Failed" => 5.0,
        _ => -1.0,
    };
    gauge!("mirror_engine_state").set(value);
}
