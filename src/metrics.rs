// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for directory-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `directory_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `protocol`: v2, v3, memory
//! - `operation`: create, get, filter, update, delete, schema
//! - `kind`: staff, department, customer
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a record store call
pub fn record_store_call(protocol: &str, operation: &str, status: &str) {
    counter!(
        "directory_sync_record_store_calls_total",
        "protocol" => protocol.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record record store call latency
pub fn record_store_latency(protocol: &str, operation: &str, duration: Duration) {
    histogram!(
        "directory_sync_record_store_seconds",
        "protocol" => protocol.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a classified record store error
pub fn record_store_error(protocol: &str, operation: &str, error_kind: &str) {
    counter!(
        "directory_sync_record_store_errors_total",
        "protocol" => protocol.to_string(),
        "operation" => operation.to_string(),
        "error_kind" => error_kind.to_string()
    )
    .increment(1);
}

/// Record the outcome of one upsert
pub fn record_upsert(kind: &str, outcome: &str) {
    counter!(
        "directory_sync_upserts_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a retry attempt (not counting the first try)
pub fn record_retry(kind: &str) {
    counter!(
        "directory_sync_retries_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an upsert that failed every attempt
pub fn record_retry_exhausted(kind: &str) {
    counter!(
        "directory_sync_retry_exhausted_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a department lookup that had to be repaired by creating the row
pub fn record_reference_repair(outcome: &str) {
    counter!(
        "directory_sync_reference_repairs_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the duration of a sync pass
pub fn record_pass_duration(pass: &str, duration: Duration) {
    histogram!(
        "directory_sync_pass_seconds",
        "pass" => pass.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record per-kind entity counts of a pass
pub fn record_pass_entities(kind: &str, status: &str, count: usize) {
    counter!(
        "directory_sync_pass_entities_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(count as u64);
}

/// Set how far the persisted cursor trails wall clock, in seconds
pub fn set_cursor_lag(tenant: &str, lag_secs: i64) {
    gauge!(
        "directory_sync_cursor_lag_seconds",
        "tenant" => tenant.to_string()
    )
    .set(lag_secs as f64);
}

/// Record a scheduler lock attempt
pub fn record_lock_attempt(task: &str, acquired: bool) {
    counter!(
        "directory_sync_lock_attempts_total",
        "task" => task.to_string(),
        "acquired" => if acquired { "true" } else { "false" }
    )
    .increment(1);
}

/// Record a background task that ended in an error or a panic
pub fn record_task_failure(task: &str, reason: &str) {
    counter!(
        "directory_sync_task_failures_total",
        "task" => task.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a customer binding operation
pub fn record_binding(operation: &str, status: &str) {
    counter!(
        "directory_sync_binding_operations_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a directory read (database or contact API)
pub fn record_directory_call(source: &str, operation: &str, status: &str) {
    counter!(
        "directory_sync_directory_calls_total",
        "source" => source.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// A timing guard that records record store latency on drop
pub struct LatencyTimer {
    protocol: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(protocol: &'static str, operation: &'static str) -> Self {
        Self {
            protocol,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_store_latency(self.protocol, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($protocol:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($protocol, $op)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_record_store_metrics() {
        record_store_call("v2", "filter", "success");
        record_store_call("v3", "create", "error");
        record_store_latency("v2", "update", Duration::from_millis(5));
        record_store_error("v3", "delete", "timeout");
    }

    #[test]
    fn test_sync_metrics() {
        record_upsert("staff", "created");
        record_retry("department");
        record_retry_exhausted("staff");
        record_reference_repair("created");
        record_pass_duration("incremental", Duration::from_secs(2));
        record_pass_entities("staff", "success", 12);
        set_cursor_lag("corp-1", 600);
        record_lock_attempt("directory_sync", false);
        record_task_failure("bind", "panic");
        record_binding("bind", "conflict");
        record_directory_call("sql", "list_changed", "success");
    }

    #[test]
    fn test_upsert_counter_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_upsert("department", "created");
            record_upsert("department", "created");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counted = snapshot.iter().find_map(|(key, _, _, value)| {
            if key.key().name() == "directory_sync_upserts_total" {
                match value {
                    DebugValue::Counter(n) => Some(*n),
                    _ => None,
                }
            } else {
                None
            }
        });
        assert_eq!(counted, Some(2));
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("v2", "get");
            std::thread::sleep(Duration::from_micros(10));
        }
        // Timer recorded on drop
    }
}
