// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the image sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the embedding
//! daemon picks the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `image_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: worker, deleter, reconciler, forker, cloner, engine
//! - `operation`: internalize_product, safe_delete, cleanup, fork, clone...
//! - `status`: success, failed, declined

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::record::AssetKind;

/// Record one pipeline operation outcome
pub fn record_operation(component: &str, operation: &str, status: &str) {
    counter!(
        "image_sync_operations_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "image_sync_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// One image pulled into managed storage
pub fn record_internalized(kind: AssetKind) {
    counter!(
        "image_sync_internalized_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// One internalization attempt that ended in `failed`
pub fn record_internalize_failure(kind: AssetKind) {
    counter!(
        "image_sync_internalize_failures_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// One copy-on-write fork completed (including already-exists absorption)
pub fn record_forked(kind: AssetKind) {
    counter!(
        "image_sync_forks_total",
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Products newly inserted by a catalog clone run
pub fn record_cloned(count: usize) {
    counter!("image_sync_cloned_products_total").increment(count as u64);
}

/// Orphans removed by a live reconciliation run
pub fn record_orphans_deleted(count: usize) {
    counter!("image_sync_orphans_deleted_total").increment(count as u64);
}

/// A safe-delete declined because the object is still referenced
pub fn record_delete_declined() {
    counter!("image_sync_deletes_declined_total").increment(1);
}

/// Current dispatch-queue depth as seen at enqueue time
pub fn set_queue_depth(depth: usize) {
    gauge!("image_sync_queue_depth").set(depth as f64);
}

/// Latency timer that records both the duration histogram and the
/// operation counter when finished.
///
/// # Example
///
/// ```
/// use image_sync_engine::metrics::LatencyTimer;
///
/// let timer = LatencyTimer::new("worker", "internalize_product");
/// // ... do the work ...
/// timer.finish("success");
/// ```
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self, status: &str) {
        record_latency(self.component, self.operation, self.start.elapsed());
        record_operation(self.component, self.operation, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer_finishes_without_recorder() {
        // With no recorder installed these are no-ops; they must not panic
        let timer = LatencyTimer::new("worker", "internalize_product");
        timer.finish("success");

        record_operation("deleter", "safe_delete", "declined");
        record_internalized(AssetKind::Product);
        record_cloned(3);
        set_queue_depth(7);
    }
}
