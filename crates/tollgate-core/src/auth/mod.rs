//! API key issuance, validation, scoping and rotation.
//!
//! # Architecture
//!
//! - **[`api_key`]**: key material generation, hashing, the stored [`ApiKeyRecord`] and its
//!   derived [`KeyStatus`]
//! - **[`scope`]**: exact and hierarchical scope matching
//! - **[`repository`]**: persistence behind the [`ApiKeyRepository`] trait, with a durable
//!   `SQLite` backend and an in-memory backend for tests and embedding
//! - **[`manager`]**: [`ApiKeyManager`], the only component that mutates key records
//!
//! # Validation Flow
//!
//! ```text
//!   Authorization: Bearer tg_abc...
//!        │
//!        ├──> Format check (46 chars, tg_ prefix, base62 body)
//!        │
//!        ├──> SHA-256 blind index ──────> Repository lookup (unique index)
//!        │                                      │
//!        ├──> Argon2id verification <───────────┘
//!        │    (dummy verification when the index is unknown)
//!        │
//!        ├──> Status derived at `now`: Active | Expired | Revoked
//!        │
//!        └──> ApiKeyRecord, or InvalidCredential for every failure case
//! ```
//!
//! # Secrets
//!
//! The raw key exists only in the caller's hands: it is returned once from
//! [`ApiKeyManager::issue`] / [`ApiKeyManager::rotate`] and never stored. Neither the raw key,
//! its Argon2 hash, nor its blind index is ever written to logs; [`ApiKeyRecord`]'s `Debug`
//! output redacts both derived values.
//!
//! # Status Without Flags
//!
//! A record carries `expires_at` and `revoked_at` and nothing else about its state. Whether a
//! key is active is computed from those facts and the current time, so there is no status
//! column that can drift out of sync.

pub mod api_key;
pub mod manager;
pub mod repository;
pub mod scope;

pub use api_key::{ApiKeyRecord, ApiKeySummary, IssuedKey, KeyHasher, KeyStatus};
pub use manager::{ApiKeyManager, RotateOptions};
pub use repository::{ApiKeyRepository, InMemoryRepository, SqliteRepository};

use thiserror::Error;

/// Error types for API key operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The presented credential is malformed, unknown, expired, or revoked.
    ///
    /// Deliberately a single variant so callers cannot tell the cases apart.
    #[error("invalid or missing API key")]
    InvalidCredential,

    /// No record exists with this id
    #[error("API key not found: {0}")]
    KeyNotFound(String),

    /// The key was revoked and has no successor
    #[error("API key revoked: {0}")]
    KeyRevoked(String),

    /// The key has passed its expiration timestamp
    #[error("API key expired: {0}")]
    KeyExpired(String),

    /// The key was already rotated; the caller lost a rotation race or retried
    #[error("API key {key_id} was already rotated to {successor_id}")]
    AlreadyRotated { key_id: String, successor_id: String },

    /// Owner ids must be non-empty and free of surrounding whitespace
    #[error("Invalid owner id")]
    InvalidOwner,

    /// A requested scope string is malformed
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Hashing parameters are invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Failed to generate or hash key material
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// The blocking hashing task panicked or was cancelled
    #[error("Hashing task failed: {0}")]
    HashingTaskFailed(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::DatabaseError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::HashingTaskFailed(err.to_string())
    }
}

impl AuthError {
    /// Whether this error is a server-side fault rather than a caller mistake.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::ConfigError(_)
                | Self::KeyGenerationError(_)
                | Self::HashingTaskFailed(_)
        )
    }
}
