use crate::{clock::SharedClock, config::RateLimitConfig};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, warn};

/// Errors from the token bucket limiter.
///
/// A denial is not an error; it is reported as [`RateDecision::Denied`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    /// Requested cost can never be satisfied by a bucket of this size.
    #[error("cost {cost} must be between 1 and the bucket capacity {capacity}")]
    InvalidCost { cost: u32, capacity: u32 },

    /// A bucket held a negative or non-finite token count.
    #[error("token bucket invariant violated for client {client_id}: tokens = {tokens}")]
    InvariantViolation { client_id: String, tokens: f64 },
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed {
        /// Bucket capacity.
        limit: u32,
        /// Whole tokens left after this acquisition.
        remaining: u32,
        /// Time until the bucket is full again.
        reset_after: Duration,
    },
    Denied {
        limit: u32,
        /// Seconds until enough tokens will have accrued for the same cost.
        retry_after_secs: u64,
    },
}

impl RateDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        match self {
            Self::Allowed { limit, .. } | Self::Denied { limit, .. } => *limit,
        }
    }
}

/// Per-client token bucket limiter.
///
/// Buckets live in a sharded map; each acquisition holds only its own entry's lock, so clients
/// never contend with each other. Tokens are fractional so slow refill rates (less than one
/// token per second) accrue without truncation.
///
/// **Security**: Limits maximum tracked clients to prevent OOM from a flood of distinct ids.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, TokenBucket>,
    capacity: u32,
    window: Duration,
    idle_ttl: Duration,
    max_buckets: usize,
    clock: SharedClock,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl TokenBucket {
    fn full(capacity: u32, now: Instant) -> Self {
        Self { tokens: f64::from(capacity), last_refill: now, last_access: now }
    }
}

impl TokenBucketLimiter {
    pub const DEFAULT_MAX_BUCKETS: usize = 100_000;

    /// Creates a limiter allowing `capacity` requests per `window`, with idle buckets evicted
    /// after two windows.
    #[must_use]
    pub fn new(capacity: u32, window: Duration, clock: SharedClock) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            window,
            idle_ttl: window.saturating_mul(2),
            max_buckets: Self::DEFAULT_MAX_BUCKETS,
            clock,
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig, clock: SharedClock) -> Self {
        Self::new(config.capacity, config.window(), clock)
            .with_max_buckets(config.max_buckets)
            .with_idle_ttl(config.idle_ttl())
    }

    #[must_use]
    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    /// Sets how long a bucket may sit unused before [`evict_idle`](Self::evict_idle) drops it.
    ///
    /// Values shorter than the window are raised to the window: a bucket idle for a full window
    /// has refilled completely, so evicting it earlier would hand the client a free burst.
    #[must_use]
    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl.max(self.window);
        self
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn refill_rate_per_second(&self) -> f64 {
        f64::from(self.capacity) / self.window.as_secs_f64()
    }

    /// Tries to take `cost` tokens from `client_id`'s bucket.
    ///
    /// A client seen for the first time starts with a full bucket.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::InvalidCost`] when `cost` is zero or larger than the capacity, and
    /// [`RateLimitError::InvariantViolation`] when the bucket state is corrupt.
    pub fn try_acquire(&self, client_id: &str, cost: u32) -> Result<RateDecision, RateLimitError> {
        if cost == 0 || cost > self.capacity {
            return Err(RateLimitError::InvalidCost { cost, capacity: self.capacity });
        }

        let now = self.clock.now();

        if let Some(mut bucket) = self.buckets.get_mut(client_id) {
            return self.acquire_from(client_id, &mut bucket, now, cost);
        }

        if self.buckets.len() >= self.max_buckets {
            warn!(
                max_buckets = self.max_buckets,
                "rate limiter tracking limit reached, rejecting new client"
            );
            return Ok(RateDecision::Denied { limit: self.capacity, retry_after_secs: 1 });
        }

        let mut bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| TokenBucket::full(self.capacity, now));

        self.acquire_from(client_id, &mut bucket, now, cost)
    }

    fn acquire_from(
        &self,
        client_id: &str,
        bucket: &mut TokenBucket,
        now: Instant,
        cost: u32,
    ) -> Result<RateDecision, RateLimitError> {
        let capacity = f64::from(self.capacity);

        // Checked before refill: `f64::min` would turn NaN into `capacity` and accrual would
        // top up a negative count.
        if !bucket.tokens.is_finite() || bucket.tokens < 0.0 {
            error!(
                client_id = %client_id,
                tokens = bucket.tokens,
                "token bucket invariant violated"
            );
            return Err(RateLimitError::InvariantViolation {
                client_id: client_id.to_string(),
                tokens: bucket.tokens,
            });
        }

        bucket.last_access = now;
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + self.tokens_accrued(elapsed)).min(capacity);
        bucket.last_refill = now;

        let cost = f64::from(cost);
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            Ok(RateDecision::Allowed {
                limit: self.capacity,
                remaining: whole_tokens(bucket.tokens),
                reset_after: self.time_to_accrue(capacity - bucket.tokens),
            })
        } else {
            let wait = self.time_to_accrue(cost - bucket.tokens);
            Ok(RateDecision::Denied {
                limit: self.capacity,
                retry_after_secs: round_up_secs(wait.as_secs_f64()),
            })
        }
    }

    // Multiply before dividing: `elapsed * (capacity / window)` drifts below whole numbers.
    fn tokens_accrued(&self, elapsed: Duration) -> f64 {
        elapsed.as_secs_f64() * f64::from(self.capacity) / self.window.as_secs_f64()
    }

    fn time_to_accrue(&self, tokens: f64) -> Duration {
        let secs = tokens * self.window.as_secs_f64() / f64::from(self.capacity);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Tokens `client_id` would have right now, without consuming any.
    #[must_use]
    pub fn peek(&self, client_id: &str) -> Option<f64> {
        let now = self.clock.now();
        self.buckets.get(client_id).map(|bucket| {
            let elapsed = now.saturating_duration_since(bucket.last_refill);
            (bucket.tokens + self.tokens_accrued(elapsed)).min(f64::from(self.capacity))
        })
    }

    /// Time until `client_id`'s bucket is full again. Zero for untracked clients.
    #[must_use]
    pub fn reset_after(&self, client_id: &str) -> Duration {
        self.peek(client_id)
            .map_or(Duration::ZERO, |tokens| self.time_to_accrue(f64::from(self.capacity) - tokens))
    }

    /// Drops buckets that have not been touched for longer than the idle TTL.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();

        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_access) < self.idle_ttl);

        before.saturating_sub(self.buckets.len())
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_tokens(tokens: f64) -> u32 {
    tokens.floor() as u32
}

/// Rounds a wait up to whole seconds, never below one.
///
/// Sub-nanosecond float residue (e.g. `12.000000000001`) is ignored rather than rounded up.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_up_secs(secs: f64) -> u64 {
    ((secs - 1e-9).ceil().max(1.0)) as u64
}
