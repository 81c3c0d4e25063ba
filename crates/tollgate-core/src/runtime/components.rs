//! Core component container for the runtime.

use crate::{
    auth::ApiKeyManager, cache::ContentCache, clock::SharedClock,
    middleware::{AccessMiddleware, TokenBucketLimiter},
};
use std::sync::Arc;

/// All initialized access-layer components.
///
/// Every component is behind an `Arc` and uses interior mutability, so the container is cheap
/// to clone into background tasks and request handlers.
#[derive(Clone)]
pub struct TollgateComponents {
    clock: SharedClock,
    keys: Arc<ApiKeyManager>,
    limiter: Arc<TokenBucketLimiter>,
    cache: Arc<ContentCache>,
    access: Arc<AccessMiddleware>,
}

impl TollgateComponents {
    pub(super) fn new(
        clock: SharedClock,
        keys: Arc<ApiKeyManager>,
        limiter: Arc<TokenBucketLimiter>,
        cache: Arc<ContentCache>,
        access: Arc<AccessMiddleware>,
    ) -> Self {
        Self { clock, keys, limiter, cache, access }
    }

    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<ApiKeyManager> {
        &self.keys
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// The composed pipeline. Shares its keys, limiter and cache with this container.
    #[must_use]
    pub fn access(&self) -> &Arc<AccessMiddleware> {
        &self.access
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<TollgateComponents>;
    let _ = assert_sync::<TollgateComponents>;
};
