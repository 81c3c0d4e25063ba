use super::rate_limiting::RateLimitError;
use crate::{auth::AuthError, backend::UpstreamError};
use thiserror::Error;

/// Why an access request did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// Missing, malformed, unknown, expired or revoked credential.
    #[error("invalid or missing API key")]
    InvalidCredential,

    #[error("API key lacks required scope {required_scope}")]
    Forbidden { required_scope: String },

    #[error("rate limit of {limit} exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64, limit: u32, reset_after_secs: u64 },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Internal state was found corrupt. Fatal to the request.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    /// The key repository failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl AccessError {
    /// Fixed label used for the `outcome` metric.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream(UpstreamError::Timeout) => "upstream_timeout",
            Self::Upstream(_) => "upstream_error",
            Self::InvariantViolation(_) | Self::Storage(_) => "internal_error",
        }
    }

    /// Whether the failure is the service's fault rather than the caller's or the backend's.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::Storage(_))
    }
}

impl From<AuthError> for AccessError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredential => Self::InvalidCredential,
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<RateLimitError> for AccessError {
    fn from(err: RateLimitError) -> Self {
        Self::InvariantViolation(err.to_string())
    }
}
