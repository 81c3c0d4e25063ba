//! Mock infrastructure for tollgate tests.
//!
//! - [`MockBackend`]: in-process [`AiBackend`](tollgate_core::backend::AiBackend) with a call
//!   counter, scripted failures and an optional gate that holds calls until released
//! - [`UpstreamMockBuilder`]: wraps mockito to stand in for the HTTP AI service
//! - fixtures for fast-hashing configs, runtimes and keys
//!
//! ```ignore
//! use tests::mock_infrastructure::{build_runtime, fast_config, MockBackend};
//!
//! let backend = MockBackend::gated();
//! let runtime = build_runtime(fast_config(), backend.clone(), clock).await;
//! ```

pub mod backend_mock;
pub mod test_helpers;
pub mod upstream_mock;

pub use backend_mock::MockBackend;
pub use test_helpers::*;
pub use upstream_mock::UpstreamMockBuilder;
