//! HTTP front end for the tollgate access layer.
//!
//! Wires a [`tollgate_core::runtime::TollgateRuntime`] to axum: the public AI routes, health
//! and metrics endpoints, and the optional key management API.

pub mod admin;
pub mod backend;
pub mod middleware;
pub mod prometheus;
pub mod router;

pub use backend::HttpAiBackend;
pub use router::{create_app, AppState};
