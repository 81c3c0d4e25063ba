//! The AI service behind the access layer.
//!
//! The access pipeline only knows the [`AiBackend`] trait; the HTTP implementation lives in the
//! server crate and tests plug in mocks.

use crate::cache::Fingerprint;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// AI operations exposed through the access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Analyze,
    Enhance,
    BestPractices,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Self::Analyze, Self::Enhance, Self::BestPractices];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Enhance => "enhance",
            Self::BestPractices => "best_practices",
        }
    }

    /// Scope a key must hold to invoke this operation.
    #[must_use]
    pub fn required_scope(&self) -> &'static str {
        match self {
            Self::Analyze => "ai:analyze",
            Self::Enhance => "ai:enhance",
            Self::BestPractices => "ai:best_practices",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "analyze" => Ok(Self::Analyze),
            "enhance" => Ok(Self::Enhance),
            "best_practices" => Ok(Self::BestPractices),
            _ => Err(UnknownOperation(s.to_string())),
        }
    }
}

/// A request for the AI backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiRequest {
    pub operation: Operation,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_model: Option<String>,
}

impl AiRequest {
    #[must_use]
    pub fn new(operation: Operation, content: impl Into<String>) -> Self {
        Self { operation, content: content.into(), target_model: None }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.target_model = Some(model.into());
        self
    }

    /// Cache key for this request.
    ///
    /// # Errors
    ///
    /// Propagates the serializer error from [`Fingerprint::compute`].
    pub fn fingerprint(&self) -> Result<Fingerprint, serde_json::Error> {
        Fingerprint::compute(self.operation.as_str(), self.target_model.as_deref(), &self.content)
    }
}

/// Failures reported by an [`AiBackend`].
///
/// `Clone` so one failed call can be reported to every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The backend did not answer within its timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// The backend answered with a non-success status.
    #[error("upstream returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// The request could not be delivered.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The backend's answer could not be used.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Status { .. } => "status",
            Self::Transport(_) => "transport",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// The external AI collaborator invoked on cache misses.
///
/// Implementations own their timeout: a call that takes too long must return
/// [`UpstreamError::Timeout`] rather than hang.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn invoke(&self, request: &AiRequest) -> Result<Bytes, UpstreamError>;
}
