// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics emitted by search-sync through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder.
//!
//! Names start with `search_sync_`. Counters end in `_total` and duration
//! histograms in `_seconds`.
//!
//! # Labels
//! - `kind`: indexable type name
//! - `disposition`: upsert, delete
//! - `outcome`: success, failure, rejected, unavailable, disabled

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// PROPAGATION - Commit-to-index traffic
// ═══════════════════════════════════════════════════════════════════════════

/// Record one change record applied (or not) to the index
pub fn record_propagation(kind: &str, disposition: &str, outcome: &str) {
    counter!(
        "search_sync_propagated_records_total",
        "kind" => kind.to_string(),
        "disposition" => disposition.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the size of a committed change set
pub fn record_change_set_size(count: usize) {
    histogram!("search_sync_change_set_records").record(count as f64);
}

/// Record how long it took to push one change set to the index
pub fn record_propagation_duration(duration: Duration) {
    histogram!("search_sync_propagation_seconds").record(duration.as_secs_f64());
}

/// Set number of change sets waiting for the background worker
pub fn set_propagation_queue_depth(depth: usize) {
    gauge!("search_sync_propagation_queue_depth").set(depth as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// SEARCH - Query and hydration
// ═══════════════════════════════════════════════════════════════════════════

/// Count a search by how it was answered
pub fn record_search_query(kind: &str, outcome: &str) {
    counter!(
        "search_sync_search_queries_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Query plus hydration time
pub fn record_search_latency(kind: &str, duration: Duration) {
    histogram!(
        "search_sync_search_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record number of hydrated results returned for one page
pub fn record_search_results(count: usize) {
    histogram!("search_sync_search_results").record(count as f64);
}

/// Record index ids that had no row in the primary store
pub fn record_drift(kind: &str, dropped: usize) {
    counter!(
        "search_sync_drift_dropped_total",
        "kind" => kind.to_string()
    )
    .increment(dropped as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// REINDEX - Rebuild progress
// ═══════════════════════════════════════════════════════════════════════════

/// Record entities pushed to the index by a rebuild
pub fn record_reindexed(kind: &str, count: usize) {
    counter!(
        "search_sync_reindexed_entities_total",
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

/// Record a rebuild finishing
pub fn record_reindex_run(kind: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "search_sync_reindex_runs_total",
        "kind" => kind.to_string(),
        "status" => status
    )
    .increment(1);
}

/// `FT.CREATE` / `FT.DROPINDEX` results
pub fn record_index_operation(operation: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "search_sync_index_operations_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// BACKENDS - Store and index reachability
// ═══════════════════════════════════════════════════════════════════════════

/// 1 while `backend` ("sql", "redis") is reachable, 0 after a connection failure
pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!(
        "search_sync_backend_healthy",
        "backend" => backend.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_connection_error(backend: &str) {
    counter!(
        "search_sync_connection_errors_total",
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// Outcome is success, failure, ignored or rejected
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "search_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

/// Time spent in one `start()` phase
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "search_sync_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_startup_total(duration: Duration) {
    histogram!("search_sync_startup_total_seconds").record(duration.as_secs_f64());
}

/// Count entries into an [`EngineState`](crate::EngineState)
pub fn set_engine_state(state: &str) {
    counter!(
        "search_sync_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "search_sync_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records `search_sync_operation_seconds` for its scope when dropped.
///
/// ```
/// let _timer = search_sync::LatencyTimer::new("resolver", "hydrate");
/// ```
pub struct LatencyTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.component, self.operation, self.start.elapsed());
    }
}
