//! HTTP routes of the gateway.
//!
//! - `POST /v1/ai/{operation}`: the access pipeline
//! - `GET /health`: liveness plus in-memory state sizes
//! - `GET /metrics`: Prometheus exposition, when enabled
//! - `/admin/keys/...`: key management, only when an admin token is configured

use crate::{
    admin::{self, AdminState},
    middleware::{extract_credential, rejection_response, request_id_layers, success_response},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tollgate_core::{
    backend::{AiRequest, Operation},
    cache::ContentCache,
    clock::SharedClock,
    middleware::{AccessMiddleware, TokenBucketLimiter},
    runtime::TollgateRuntime,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
};
use tracing::debug;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Shared state of the public routes.
#[derive(Clone)]
pub struct AppState {
    pub access: Arc<AccessMiddleware>,
    pub cache: Arc<ContentCache>,
    pub limiter: Arc<TokenBucketLimiter>,
    pub clock: SharedClock,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn from_runtime(runtime: &TollgateRuntime, metrics: Option<PrometheusHandle>) -> Self {
        let components = runtime.components();
        Self {
            access: components.access().clone(),
            cache: components.cache().clone(),
            limiter: components.limiter().clone(),
            clock: components.clock().clone(),
            metrics,
        }
    }
}

/// Body of `POST /v1/ai/{operation}`.
#[derive(Debug, Deserialize)]
pub struct AiRequestBody {
    pub content: String,
    #[serde(default)]
    pub target_model: Option<String>,
}

/// `POST /v1/ai/{operation}`
///
/// The credential is checked before the operation or body are decoded, so unauthenticated
/// callers always get 401.
pub async fn handle_ai(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let record = match state.access.authenticate(extract_credential(&headers)).await {
        Ok(record) => record,
        Err(err) => return rejection_response(&err, state.clock.utc_now()),
    };

    let operation = match operation.parse::<Operation>() {
        Ok(op) => op,
        Err(e) => {
            debug!(operation = %e.0, "unknown operation requested");
            return error_json(StatusCode::NOT_FOUND, e.to_string());
        }
    };

    let body = match serde_json::from_slice::<AiRequestBody>(&body) {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "malformed request body");
            return error_json(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"));
        }
    };

    let mut request = AiRequest::new(operation, body.content);
    if let Some(model) = body.target_model {
        request = request.with_model(model);
    }

    let result = state.access.serve(record, &request).await;
    let now = state.clock.utc_now();
    match result {
        Ok(served) => success_response(served, now),
        Err(err) => rejection_response(&err, now),
    }
}

fn error_json(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// `GET /health`
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "cache_entries": state.cache.len(),
        "inflight": state.cache.inflight_count(),
        "rate_limit_buckets": state.limiter.bucket_count(),
        "timestamp": state.clock.utc_now().to_rfc3339(),
    }))
}

/// `GET /metrics`
pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => {
            (StatusCode::OK, [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render())
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Assembles the full application router for `runtime`.
pub fn create_app(runtime: &TollgateRuntime, metrics: Option<PrometheusHandle>) -> Router {
    let config = runtime.config();
    let state = AppState::from_runtime(runtime, metrics);

    let public = Router::new()
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state.clone());

    let api = Router::new()
        .route("/v1/ai/{operation}", post(handle_ai))
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(CompressionLayer::new());

    let mut app = public.merge(api);

    if let Some(token) = &config.auth.admin_token {
        let admin_state =
            AdminState { keys: runtime.keys().clone(), clock: runtime.components().clock().clone() };
        app = app.merge(admin::create_admin_router(admin_state, Arc::new(token.clone())));
    } else {
        debug!("admin token not configured, key management API disabled");
    }

    let (set_request_id, trace, propagate_request_id) = request_id_layers();
    app.layer(propagate_request_id).layer(trace).layer(set_request_id)
}
