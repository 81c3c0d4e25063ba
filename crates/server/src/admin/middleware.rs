//! Admin token check.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

pub static X_ADMIN_TOKEN: HeaderName = HeaderName::from_static("x-admin-token");

/// Rejects requests whose `X-Admin-Token` does not match the configured token.
///
/// The comparison is constant-time over the token bytes. There is no open mode: without a
/// configured token the admin router is not mounted at all.
///
/// # Errors
///
/// `401 Unauthorized` for a missing or wrong token.
pub async fn admin_auth_middleware(
    State(expected_token): State<Arc<String>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided = request
        .headers()
        .get(&X_ADMIN_TOKEN)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if provided.as_bytes().ct_eq(expected_token.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        warn!(path = request.uri().path(), "admin request with wrong token");
        Err(StatusCode::UNAUTHORIZED)
    }
}
