//! Credential extraction from request headers.
//!
//! Keys are accepted from `Authorization: Bearer <key>` or, when that header is absent, from
//! `X-API-Key`. Query-string keys are not accepted: URLs end up in access logs.

use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderName};

pub static X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Returns the presented API key, if any.
///
/// A malformed `Authorization` header (wrong scheme, non-ASCII) yields `None` rather than
/// falling back to `X-API-Key`, so a client cannot present two different keys.
#[must_use]
pub fn extract_credential(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        return Some(token.trim()).filter(|t| !t.is_empty());
    }

    headers
        .get(&X_API_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_bearer_token() {
        let h = headers(&[("authorization", "Bearer tg_abc")]);
        assert_eq!(extract_credential(&h), Some("tg_abc"));

        let h = headers(&[("authorization", "bearer   tg_abc ")]);
        assert_eq!(extract_credential(&h), Some("tg_abc"));
    }

    #[test]
    fn test_x_api_key_header() {
        let h = headers(&[("x-api-key", "tg_xyz")]);
        assert_eq!(extract_credential(&h), Some("tg_xyz"));
    }

    #[test]
    fn test_authorization_takes_precedence() {
        let h = headers(&[("authorization", "Bearer tg_a"), ("x-api-key", "tg_b")]);
        assert_eq!(extract_credential(&h), Some("tg_a"));
    }

    #[test]
    fn test_wrong_scheme_does_not_fall_back() {
        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz"), ("x-api-key", "tg_b")]);
        assert_eq!(extract_credential(&h), None);
    }

    #[test]
    fn test_missing_or_blank() {
        assert_eq!(extract_credential(&HeaderMap::new()), None);
        assert_eq!(extract_credential(&headers(&[("x-api-key", "  ")])), None);
        assert_eq!(extract_credential(&headers(&[("authorization", "Bearer ")])), None);
    }
}
