//! Request id propagation and per-request tracing spans.
//!
//! An incoming `x-request-id` is kept; otherwise a UUID v4 is generated. The id is echoed on
//! the response and attached to the request's tracing span so every log line emitted while
//! serving it can be correlated.

use axum::http::{header::HeaderValue, HeaderName, Request};
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{MakeSpan, TraceLayer},
};
use tracing::Span;
use uuid::Uuid;

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

/// Opens an `http` span carrying method, path and request id. The query string is left out.
#[derive(Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "http",
            method = %request.method(),
            path = request.uri().path(),
            request_id,
        )
    }
}

/// Layers for request id handling, outermost first.
///
/// `SetRequestIdLayer` must wrap the other two so the id exists before the span is made and
/// before the response is built:
///
/// ```ignore
/// let (set_id, trace, propagate_id) = request_id_layers();
/// let app = Router::new()
///     .route("/", get(handler))
///     .layer(propagate_id)
///     .layer(trace)
///     .layer(set_id);
/// ```
pub fn request_id_layers() -> (
    SetRequestIdLayer<UuidRequestIdGenerator>,
    TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan>,
    PropagateRequestIdLayer,
) {
    (
        SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestIdGenerator),
        TraceLayer::new_for_http().make_span_with(RequestSpan),
        PropagateRequestIdLayer::new(X_REQUEST_ID.clone()),
    )
}
