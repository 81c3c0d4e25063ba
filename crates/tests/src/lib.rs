//! Integration tests for tollgate.
//!
//! - `pipeline_tests`: stage ordering and outcomes of the access pipeline
//! - `key_lifecycle_tests`: issue, validate, revoke, rotate, expiry and durability of keys
//! - `cache_dedup_tests`: in-flight coalescing and leader cancellation
//! - `runtime_tests`: builder validation, sweeper and shutdown
//! - `http_tests`: the server against a mocked HTTP upstream
//! - `mock_infrastructure`: reusable backends, upstream mocks and fixtures
//!
//! ```bash
//! cargo test --package tests
//! ```

#[cfg(test)]
mod cache_dedup_tests;

#[cfg(test)]
mod http_tests;

#[cfg(test)]
mod key_lifecycle_tests;

#[cfg(test)]
mod pipeline_tests;

#[cfg(test)]
mod runtime_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
