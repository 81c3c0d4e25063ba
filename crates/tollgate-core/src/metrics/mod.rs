//! # Metrics
//!
//! Counters and gauges recorded through the `metrics` facade. Recording is a no-op until a
//! recorder is installed; the server installs the Prometheus exporter at startup and renders it
//! on `/metrics`.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `tollgate_requests_total` | counter | `outcome` |
//! | `tollgate_request_duration_seconds` | histogram | `operation` |
//! | `tollgate_cache_hits_total` / `_misses_total` / `_coalesced_total` | counter | |
//! | `tollgate_rate_limited_total` | counter | |
//! | `tollgate_auth_failures_total` | counter | `reason` |
//! | `tollgate_upstream_errors_total` | counter | `kind` |
//! | `tollgate_keys_issued_total` / `_revoked_total` / `_rotated_total` | counter | |
//! | `tollgate_cache_entries` | gauge | |
//! | `tollgate_rate_limit_buckets` | gauge | |
//!
//! Label values are always drawn from fixed sets; client and key identifiers are never labels.

use crate::cache::CacheStatus;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Records the final outcome of one access request.
pub fn record_request(outcome: &'static str) {
    counter!("tollgate_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_request_duration(operation: &'static str, elapsed: Duration) {
    histogram!("tollgate_request_duration_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
}

pub fn record_cache_lookup(status: CacheStatus) {
    match status {
        CacheStatus::Hit => counter!("tollgate_cache_hits_total").increment(1),
        CacheStatus::Miss => counter!("tollgate_cache_misses_total").increment(1),
        CacheStatus::Coalesced => counter!("tollgate_cache_coalesced_total").increment(1),
    }
}

pub fn record_rate_limited() {
    counter!("tollgate_rate_limited_total").increment(1);
}

pub fn record_auth_failure(reason: &'static str) {
    counter!("tollgate_auth_failures_total", "reason" => reason).increment(1);
}

pub fn record_upstream_error(kind: &'static str) {
    counter!("tollgate_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_key_issued() {
    counter!("tollgate_keys_issued_total").increment(1);
}

pub fn record_key_revoked() {
    counter!("tollgate_keys_revoked_total").increment(1);
}

pub fn record_key_rotated() {
    counter!("tollgate_keys_rotated_total").increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(entries: usize) {
    gauge!("tollgate_cache_entries").set(entries as f64);
}

#[allow(clippy::cast_precision_loss)]
pub fn set_rate_limit_buckets(buckets: usize) {
    gauge!("tollgate_rate_limit_buckets").set(buckets as f64);
}
