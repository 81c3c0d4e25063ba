//! Response cache for AI requests.
//!
//! ```text
//!   AiRequest ──> Fingerprint (SHA-256 of canonical form)
//!                      │
//!                      v
//!              ┌───────────────┐  hit   ┌──────────────┐
//!              │ ContentCache  │ ─────> │ cached bytes │
//!              └───────┬───────┘        └──────────────┘
//!                      │ miss
//!                      v
//!              ┌───────────────┐  waiters share the leader's outcome
//!              │ InflightFills │ <───────────────────────────────────
//!              └───────┬───────┘
//!                      │ leader
//!                      v
//!                 AiBackend call ──> stored on success only
//! ```
//!
//! Entries live for a fixed TTL from insertion. The runtime's sweeper calls
//! [`ContentCache::sweep_expired`] periodically; reads also drop expired entries they touch.

pub mod content_cache;
pub mod fingerprint;
mod inflight;

pub use content_cache::{CacheStatus, ContentCache};
pub use fingerprint::Fingerprint;
