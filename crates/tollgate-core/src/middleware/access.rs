use super::{
    errors::AccessError,
    rate_limiting::{RateDecision, TokenBucketLimiter},
};
use crate::{
    auth::{ApiKeyManager, ApiKeyRecord, AuthError},
    backend::{AiBackend, AiRequest},
    cache::{CacheStatus, ContentCache},
    metrics,
};
use bytes::Bytes;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info_span, warn, Instrument};

/// Rate limit state reported alongside a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the caller's bucket is full again.
    pub reset_after: Duration,
}

/// A response produced by the access pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessResponse {
    pub body: Bytes,
    pub cache_status: CacheStatus,
    pub rate: RateLimitInfo,
    /// Id of the key that authorized the request
    pub key_id: String,
}

/// Composition root of the access layer.
///
/// ```text
///   credential ──> authenticate ──> authorize ──> admit ──> lookup/fill ──> response
///                  (ApiKeyManager)  (scope)      (bucket)   (ContentCache + AiBackend)
/// ```
///
/// Stages run in that order and the first failure ends the request. Only the fill stage
/// suspends on network I/O.
pub struct AccessMiddleware {
    keys: Arc<ApiKeyManager>,
    limiter: Arc<TokenBucketLimiter>,
    cache: Arc<ContentCache>,
    backend: Arc<dyn AiBackend>,
}

impl AccessMiddleware {
    #[must_use]
    pub fn new(
        keys: Arc<ApiKeyManager>,
        limiter: Arc<TokenBucketLimiter>,
        cache: Arc<ContentCache>,
        backend: Arc<dyn AiBackend>,
    ) -> Self {
        Self { keys, limiter, cache, backend }
    }

    /// Runs the full pipeline for one request.
    ///
    /// # Errors
    ///
    /// The first stage failure, as an [`AccessError`].
    pub async fn handle(
        &self,
        credential: Option<&str>,
        request: &AiRequest,
    ) -> Result<AccessResponse, AccessError> {
        let record = self.authenticate(credential).await?;
        self.serve(record, request).await
    }

    /// The authenticate stage on its own, for callers that must reject unauthenticated traffic
    /// before they decode the request.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidCredential`] for a missing, unknown, revoked or expired key.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<ApiKeyRecord, AccessError> {
        let result = self.check_credential(credential).instrument(info_span!("authenticate")).await;
        if let Err(err) = &result {
            metrics::record_request(err.outcome());
        }
        result
    }

    /// Runs the stages after authentication for a key returned by [`Self::authenticate`].
    ///
    /// # Errors
    ///
    /// The first stage failure, as an [`AccessError`].
    pub async fn serve(
        &self,
        record: ApiKeyRecord,
        request: &AiRequest,
    ) -> Result<AccessResponse, AccessError> {
        let started = Instant::now();
        let span = info_span!("access", operation = %request.operation, key_id = %record.id);
        let result = self.run(record, request).instrument(span).await;

        metrics::record_request(match &result {
            Ok(_) => "ok",
            Err(err) => err.outcome(),
        });
        metrics::record_request_duration(request.operation.as_str(), started.elapsed());
        result
    }

    async fn run(
        &self,
        record: ApiKeyRecord,
        request: &AiRequest,
    ) -> Result<AccessResponse, AccessError> {
        info_span!("authorize").in_scope(|| self.authorize(&record, request))?;

        let rate =
            info_span!("admit", client_id = %record.owner_id).in_scope(|| self.admit(&record))?;

        let (body, cache_status) = self
            .lookup_or_fill(request)
            .instrument(info_span!("lookup_fill"))
            .await?;

        debug!(
            key_id = %record.id,
            cache_status = cache_status.as_str(),
            remaining = rate.remaining,
            "request served"
        );

        Ok(AccessResponse { body, cache_status, rate, key_id: record.id })
    }

    async fn check_credential(&self, credential: Option<&str>) -> Result<ApiKeyRecord, AccessError> {
        let Some(raw_key) = credential.map(str::trim).filter(|c| !c.is_empty()) else {
            debug!(reason = "missing", "credential rejected");
            metrics::record_auth_failure("missing");
            return Err(AccessError::InvalidCredential);
        };

        self.keys.validate(raw_key).await.map_err(|err| {
            if err != AuthError::InvalidCredential {
                error!(error = %err, "credential validation failed");
            }
            AccessError::from(err)
        })
    }

    fn authorize(&self, record: &ApiKeyRecord, request: &AiRequest) -> Result<(), AccessError> {
        let required = request.operation.required_scope();
        if self.keys.check_scope(record, required) {
            Ok(())
        } else {
            debug!(key_id = %record.id, required_scope = required, "scope check failed");
            Err(AccessError::Forbidden { required_scope: required.to_string() })
        }
    }

    fn admit(&self, record: &ApiKeyRecord) -> Result<RateLimitInfo, AccessError> {
        match self.limiter.try_acquire(&record.owner_id, 1)? {
            RateDecision::Allowed { limit, remaining, reset_after } => {
                Ok(RateLimitInfo { limit, remaining, reset_after })
            }
            RateDecision::Denied { limit, retry_after_secs } => {
                debug!(
                    client_id = %record.owner_id,
                    retry_after_secs,
                    "rate limit exceeded"
                );
                metrics::record_rate_limited();
                let reset_after = self.limiter.reset_after(&record.owner_id);
                Err(AccessError::RateLimited {
                    retry_after_secs,
                    limit,
                    reset_after_secs: reset_after.as_secs().max(retry_after_secs),
                })
            }
        }
    }

    async fn lookup_or_fill(
        &self,
        request: &AiRequest,
    ) -> Result<(Bytes, CacheStatus), AccessError> {
        let fingerprint = request.fingerprint().map_err(|e| {
            error!(error = %e, "failed to fingerprint request");
            AccessError::InvariantViolation(format!("fingerprint: {e}"))
        })?;

        self.cache
            .get_or_fill(fingerprint, || self.backend.invoke(request))
            .await
            .map_err(|err| {
                warn!(fingerprint = %fingerprint, error = %err, "upstream call failed");
                metrics::record_upstream_error(err.kind());
                AccessError::Upstream(err)
            })
    }
}
