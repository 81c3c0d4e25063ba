//! HTTP mapping of access pipeline outcomes.
//!
//! | Outcome | Status | Extra headers |
//! |---------|--------|---------------|
//! | served | 200 | `X-Cache`, `X-RateLimit-*` |
//! | `InvalidCredential` | 401 | `WWW-Authenticate: Bearer` |
//! | `Forbidden` | 403 | |
//! | `RateLimited` | 429 | `Retry-After`, `X-RateLimit-*` |
//! | `Upstream(Timeout)` | 504 | |
//! | `Upstream(_)` | 502 | |
//! | `InvariantViolation`, `Storage` | 500 | |
//!
//! Bodies are `{"error": "..."}`. Server-side failures get a generic message; details go to the
//! log only.

use axum::{
    http::{
        header::{CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE},
        HeaderMap, HeaderName, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tollgate_core::{
    backend::UpstreamError,
    middleware::{AccessError, AccessResponse},
};
use tracing::error;

pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_at: i64) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(reset_at));
}

/// Unix seconds `after_secs` from `now`, rounded up.
fn unix_after(now: DateTime<Utc>, after_secs: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let delta = after_secs.ceil() as i64;
    now.timestamp().saturating_add(delta)
}

/// Builds the 200 response for a served request.
///
/// Coalesced requests report `HIT`: they did not cause an upstream call.
#[must_use]
pub fn success_response(served: AccessResponse, now: DateTime<Utc>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        X_CACHE.clone(),
        HeaderValue::from_static(if served.cache_status.is_hit() { "HIT" } else { "MISS" }),
    );
    rate_limit_headers(
        &mut headers,
        served.rate.limit,
        served.rate.remaining,
        unix_after(now, served.rate.reset_after.as_secs_f64()),
    );

    (StatusCode::OK, headers, served.body).into_response()
}

/// Builds the error response for a rejected request.
#[must_use]
pub fn rejection_response(err: &AccessError, now: DateTime<Utc>) -> Response {
    let mut headers = HeaderMap::new();

    let (status, message) = match err {
        AccessError::InvalidCredential => {
            headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            (StatusCode::UNAUTHORIZED, err.to_string())
        }
        AccessError::Forbidden { .. } => (StatusCode::FORBIDDEN, err.to_string()),
        AccessError::RateLimited { retry_after_secs, limit, reset_after_secs } => {
            headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            #[allow(clippy::cast_precision_loss)]
            let reset_at = unix_after(now, *reset_after_secs as f64);
            rate_limit_headers(&mut headers, *limit, 0, reset_at);
            (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded".to_string())
        }
        AccessError::Upstream(UpstreamError::Timeout) => {
            (StatusCode::GATEWAY_TIMEOUT, "upstream timed out".to_string())
        }
        AccessError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream request failed".to_string()),
        AccessError::InvariantViolation(_) | AccessError::Storage(_) => {
            error!(error = %err, "request failed with internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
        }
    };

    (status, headers, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::time::Duration;
    use tollgate_core::{cache::CacheStatus, middleware::RateLimitInfo};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn header<'a>(response: &'a Response, name: &HeaderName) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn served(cache_status: CacheStatus) -> AccessResponse {
        AccessResponse {
            body: Bytes::from_static(b"{\"ok\":true}"),
            cache_status,
            rate: RateLimitInfo { limit: 10, remaining: 7, reset_after: Duration::from_millis(18_200) },
            key_id: "k1".to_string(),
        }
    }

    #[test]
    fn test_success_headers() {
        let response = success_response(served(CacheStatus::Miss), now());

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, &X_CACHE), "MISS");
        assert_eq!(header(&response, &X_RATELIMIT_LIMIT), "10");
        assert_eq!(header(&response, &X_RATELIMIT_REMAINING), "7");
        assert_eq!(header(&response, &X_RATELIMIT_RESET), "1700000019");
    }

    #[test]
    fn test_coalesced_reports_hit() {
        let response = success_response(served(CacheStatus::Coalesced), now());
        assert_eq!(header(&response, &X_CACHE), "HIT");
    }

    #[tokio::test]
    async fn test_unauthorized_is_generic() {
        let response = rejection_response(&AccessError::InvalidCredential, now());

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(header(&response, &WWW_AUTHENTICATE), "Bearer");
        assert_eq!(body_json(response).await, json!({ "error": "invalid or missing API key" }));
    }

    #[test]
    fn test_rate_limited_headers() {
        let err = AccessError::RateLimited { retry_after_secs: 12, limit: 5, reset_after_secs: 60 };
        let response = rejection_response(&err, now());

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(header(&response, &RETRY_AFTER), "12");
        assert_eq!(header(&response, &X_RATELIMIT_LIMIT), "5");
        assert_eq!(header(&response, &X_RATELIMIT_REMAINING), "0");
        assert_eq!(header(&response, &X_RATELIMIT_RESET), "1700000060");
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AccessError::Forbidden { required_scope: "ai:enhance".into() }, StatusCode::FORBIDDEN),
            (AccessError::Upstream(UpstreamError::Timeout), StatusCode::GATEWAY_TIMEOUT),
            (
                AccessError::Upstream(UpstreamError::Status { code: 500, message: String::new() }),
                StatusCode::BAD_GATEWAY,
            ),
            (AccessError::Storage("db locked".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (AccessError::InvariantViolation("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(rejection_response(&err, now()).status(), expected, "{err:?}");
        }
    }

    #[tokio::test]
    async fn test_internal_details_are_not_exposed() {
        let response = rejection_response(&AccessError::Storage("disk I/O error".into()), now());
        assert_eq!(body_json(response).await, json!({ "error": "internal server error" }));
    }
}
