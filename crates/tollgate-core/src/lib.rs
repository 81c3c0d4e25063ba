//! # Tollgate Core
//!
//! Access-control and efficiency layer for services that front an expensive, rate-limited AI
//! backend.
//!
//! This crate provides:
//!
//! - **[`auth`]**: API key issuance, Argon2id hashing, validation, scopes, revocation and
//!   rotation over a pluggable repository (`SQLite` or in-memory).
//!
//! - **[`middleware`]**: the ordered access pipeline and the per-owner token bucket limiter.
//!
//! - **[`cache`]**: a TTL cache keyed by request fingerprint, with de-duplication of identical
//!   concurrent misses.
//!
//! - **[`backend`]**: the [`AiBackend`](backend::AiBackend) collaborator trait and request
//!   types.
//!
//! - **[`runtime`]**: builds and owns the components and the background sweeper.
//!
//! - **[`metrics`]**, **[`config`]**, **[`clock`]**: ambient plumbing.
//!
//! ## Request Flow
//!
//! ```text
//! credential + AiRequest
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Authenticate │ ─── unknown / expired / revoked ──► InvalidCredential
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │  Authorize   │ ─── missing scope ──► Forbidden
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │    Admit     │ ─── bucket empty ──► RateLimited
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ Cache Lookup │ ─── hit ──► cached bytes
//! └──────┬───────┘
//!        │ miss (one fill per fingerprint, others wait)
//!        ▼
//! ┌──────────────┐
//! │  AiBackend   │ ─── error ──► Upstream (not cached)
//! └──────┬───────┘
//!        ▼
//!   Cache Insert ──► response
//! ```

pub mod auth;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod middleware;
pub mod runtime;
