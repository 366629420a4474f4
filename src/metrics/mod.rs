// Metrics module for Prometheus observability
// Author: kelexine (https://github.com/kelexine)

mod registry;

pub use registry::{
    gather_metrics,
    FETCH_TOTAL,
    FETCH_FAILURES,
    FETCH_DURATION,
    CACHE_WRITES,
    CACHE_STORES,
    LIFECYCLE_EVENTS,
};

/// Helper to record a fetch that produced a response
pub fn record_fetch(class: &str, source: &str, duration_secs: f64) {
    FETCH_TOTAL.with_label_values(&[class, source]).inc();
    FETCH_DURATION.with_label_values(&[class]).observe(duration_secs);
}

/// Helper to record a fetch that produced no response
pub fn record_fetch_failure(class: &str, duration_secs: f64) {
    FETCH_FAILURES.with_label_values(&[class]).inc();
    FETCH_DURATION.with_label_values(&[class]).observe(duration_secs);
}

/// Helper to record write-behind outcomes
pub fn record_cache_write(outcome: &str) {
    CACHE_WRITES.with_label_values(&[outcome]).inc();
}

pub fn update_cache_stores(count: usize) {
    CACHE_STORES.set(count as i64);
}

/// Helper to record lifecycle events (install, activate, sync)
pub fn record_lifecycle(event: &str, outcome: &str) {
    LIFECYCLE_EVENTS.with_label_values(&[event, outcome]).inc();
}
