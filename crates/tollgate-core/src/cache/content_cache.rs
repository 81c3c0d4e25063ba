use super::{
    fingerprint::Fingerprint,
    inflight::{self, FillRole, InflightFills},
};
use crate::{backend::UpstreamError, clock::SharedClock, config::CacheConfig, metrics};
use bytes::Bytes;
use dashmap::DashMap;
use std::{
    future::Future,
    time::{Duration, Instant},
};
use tracing::debug;

/// How a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a stored entry.
    Hit,
    /// This caller invoked the backend.
    Miss,
    /// Served from another caller's in-flight backend call.
    Coalesced,
}

impl CacheStatus {
    /// Whether the caller avoided a backend call.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        !matches!(self, Self::Miss)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Coalesced => "coalesced",
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    created_at: Instant,
    /// `None` when `created_at + ttl` is past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now > deadline)
    }
}

/// TTL cache of AI responses keyed by request fingerprint.
///
/// Entries expire a fixed time after insertion and are never returned once `now > expires_at`.
/// Expired entries are dropped lazily on access and in bulk by [`sweep_expired`]. There is no
/// size bound; the TTL is the only limit.
///
/// [`sweep_expired`]: ContentCache::sweep_expired
pub struct ContentCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    inflight: InflightFills,
    default_ttl: Duration,
    enabled: bool,
    dedupe_inflight: bool,
    clock: SharedClock,
}

impl ContentCache {
    #[must_use]
    pub fn new(default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: InflightFills::default(),
            default_ttl,
            enabled: true,
            dedupe_inflight: true,
            clock,
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig, clock: SharedClock) -> Self {
        Self::new(config.ttl(), clock)
            .with_enabled(config.enabled)
            .with_inflight_dedupe(config.dedupe_inflight)
    }

    /// A disabled cache stores nothing and sends every request to the backend.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_inflight_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe_inflight = dedupe;
        self
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the stored value if present and not expired.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        let now = self.clock.now();
        match self.entries.get(fingerprint) {
            None => return None,
            Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }

        self.entries.remove_if(fingerprint, |_, entry| entry.is_expired_at(now));
        None
    }

    /// Stores `value` for `ttl` from now, replacing any existing entry.
    pub fn put(&self, fingerprint: Fingerprint, value: Bytes, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let now = self.clock.now();
        let expires_at = now.checked_add(ttl);
        self.entries.insert(fingerprint, CacheEntry { value, created_at: now, expires_at });
    }

    pub fn put_default(&self, fingerprint: Fingerprint, value: Bytes) {
        self.put(fingerprint, value, self.default_ttl);
    }

    /// Age of a live entry.
    #[must_use]
    pub fn age(&self, fingerprint: &Fingerprint) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .get(fingerprint)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| now.saturating_duration_since(entry.created_at))
    }

    /// Returns the cached value, or runs `fill` and caches its successful result.
    ///
    /// Concurrent callers missing on the same fingerprint share one `fill`: the first becomes
    /// the leader and the rest wait for its outcome. Errors reach every waiting caller but are
    /// never stored. If the leader is cancelled, one of the waiters takes over.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `fill` (this caller's or the leader's).
    pub async fn get_or_fill<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        fill: F,
    ) -> Result<(Bytes, CacheStatus), UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, UpstreamError>>,
    {
        if !self.dedupe_inflight || !self.enabled {
            if let Some(value) = self.get(&fingerprint) {
                metrics::record_cache_lookup(CacheStatus::Hit);
                return Ok((value, CacheStatus::Hit));
            }
            metrics::record_cache_lookup(CacheStatus::Miss);
            let value = fill().await?;
            self.put_default(fingerprint, value.clone());
            return Ok((value, CacheStatus::Miss));
        }

        let guard = loop {
            if let Some(value) = self.get(&fingerprint) {
                metrics::record_cache_lookup(CacheStatus::Hit);
                return Ok((value, CacheStatus::Hit));
            }

            match self.inflight.join_or_lead(fingerprint) {
                FillRole::Leader(guard) => break guard,
                FillRole::Waiter(rx) => match inflight::wait_for_leader(rx).await {
                    Some(outcome) => {
                        metrics::record_cache_lookup(CacheStatus::Coalesced);
                        debug!(fingerprint = %fingerprint, "joined in-flight fill");
                        return outcome.map(|value| (value, CacheStatus::Coalesced));
                    }
                    None => {
                        debug!(fingerprint = %fingerprint, "in-flight leader abandoned, retrying");
                    }
                },
            }
        };

        // Another leader may have stored the value between our lookup and taking the slot.
        if let Some(value) = self.get(&fingerprint) {
            guard.finish(Ok(value.clone()));
            metrics::record_cache_lookup(CacheStatus::Hit);
            return Ok((value, CacheStatus::Hit));
        }

        metrics::record_cache_lookup(CacheStatus::Miss);
        let outcome = fill().await;
        if let Ok(value) = &outcome {
            self.put_default(fingerprint, value.clone());
        }
        guard.finish(outcome.clone());
        outcome.map(|value| (value, CacheStatus::Miss))
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    /// Stored entries, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fingerprints with a backend call currently in progress.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }
}
