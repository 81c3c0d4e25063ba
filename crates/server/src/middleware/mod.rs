//! HTTP adapters around `tollgate_core::middleware`.
//!
//! The access pipeline itself is transport-free. This module owns the HTTP side of it:
//! pulling the credential out of headers, turning pipeline outcomes into status codes and
//! headers, and request id propagation.

pub mod credential;
pub mod request_id;
pub mod responses;

pub use credential::{extract_credential, X_API_KEY};
pub use request_id::{request_id_layers, UuidRequestIdGenerator, X_REQUEST_ID};
pub use responses::{rejection_response, success_response};
