//! Access pipeline for AI requests.
//!
//! This module is the **business logic layer**. HTTP concerns (header extraction, status codes,
//! response headers) live in `crates/server/src/middleware`; everything here is transport-free
//! and testable without a server.
//!
//! # Pipeline
//!
//! ```text
//!   credential + AiRequest
//!        │
//!        ▼
//!   ┌─────────────────────────┐
//!   │  1. AUTHENTICATE        │  ApiKeyManager::validate()
//!   └─────────────────────────┘
//!        │ missing / invalid ──> AccessError::InvalidCredential   (401)
//!        ▼
//!   ┌─────────────────────────┐
//!   │  2. AUTHORIZE           │  operation.required_scope()
//!   └─────────────────────────┘
//!        │ scope missing ─────> AccessError::Forbidden           (403)
//!        ▼
//!   ┌─────────────────────────┐
//!   │  3. ADMIT               │  TokenBucketLimiter::try_acquire(owner_id, 1)
//!   └─────────────────────────┘
//!        │ denied ────────────> AccessError::RateLimited         (429)
//!        ▼
//!   ┌─────────────────────────┐
//!   │  4. LOOKUP / FILL       │  ContentCache::get_or_fill() ──> AiBackend::invoke()
//!   └─────────────────────────┘
//!        │ backend failure ───> AccessError::Upstream            (502 / 504)
//!        ▼
//!   AccessResponse { body, cache_status, rate, key_id }
//! ```
//!
//! Rejected requests never reach later stages: a forbidden request spends no tokens and an
//! unauthenticated one never touches the cache.
//!
//! # Rate Limiting
//!
//! Buckets are keyed by the key's owner, so every key of one owner draws from the same budget.
//! Tokens refill continuously:
//!
//! ```rust,ignore
//! tokens = min(capacity, tokens + elapsed * capacity / window)
//! ```

pub mod access;
pub mod errors;
pub mod rate_limiting;

pub use access::{AccessMiddleware, AccessResponse, RateLimitInfo};
pub use errors::AccessError;
pub use rate_limiting::{RateDecision, RateLimitError, TokenBucketLimiter};
