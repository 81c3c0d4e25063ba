use super::{scope, AuthError};
use crate::config::AuthConfig;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{collections::BTreeSet, fmt};

/// Prefix carried by every issued key.
pub const KEY_PREFIX: &str = "tg_";
/// Random base62 characters after the prefix. 43 × log2(62) ≈ 256.02 bits of entropy.
pub const KEY_BODY_LENGTH: usize = 43;
pub const KEY_LENGTH: usize = KEY_PREFIX.len() + KEY_BODY_LENGTH;
/// Characters of the raw key kept on the record for display (`tg_` plus five).
pub const DISPLAY_PREFIX_LENGTH: usize = 8;

pub const HASH_PARALLELISM: u32 = 4;
/// Argon2 requires at least 8 KiB per lane.
pub const MIN_HASH_MEMORY_KIB: u32 = 8 * HASH_PARALLELISM;
const HASH_OUTPUT_LENGTH: usize = 32;

/// Lifecycle state of a key, derived from its timestamps and the current time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Expired,
    Revoked,
}

impl KeyStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored API key record.
///
/// The raw key is never part of a record. `secret_hash` is an Argon2id PHC string with a
/// per-key salt; `blind_index` is the hex SHA-256 of the raw key and is used only to find the
/// record before the slow verification runs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    /// Opaque identifier, safe to log
    pub id: String,
    pub owner_id: String,
    /// Optional human label
    pub name: Option<String>,
    /// Leading characters of the raw key, for operators to recognise it
    pub key_prefix: String,
    pub secret_hash: String,
    pub blind_index: String,
    pub scopes: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Last successful validation, recorded at a coarse per-key resolution
    pub last_used_at: Option<DateTime<Utc>>,
    /// Predecessor when this key was created by rotation
    pub rotated_from_id: Option<String>,
}

impl fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("name", &self.name)
            .field("key_prefix", &self.key_prefix)
            .field("secret_hash", &"<redacted>")
            .field("blind_index", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("revoked_at", &self.revoked_at)
            .field("last_used_at", &self.last_used_at)
            .field("rotated_from_id", &self.rotated_from_id)
            .finish()
    }
}

impl ApiKeyRecord {
    /// Status at `now`. Revocation wins over expiry when both apply.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> KeyStatus {
        if self.revoked_at.is_some() {
            KeyStatus::Revoked
        } else if self.expires_at.is_some_and(|expires_at| now >= expires_at) {
            KeyStatus::Expired
        } else {
            KeyStatus::Active
        }
    }

    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == KeyStatus::Active
    }

    #[must_use]
    pub fn has_scope(&self, required: &str) -> bool {
        scope::check_scope(&self.scopes, required)
    }

    /// Listing view without the derived secrets.
    #[must_use]
    pub fn summary(&self, now: DateTime<Utc>) -> ApiKeySummary {
        ApiKeySummary {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            key_prefix: self.key_prefix.clone(),
            scopes: self.scopes.clone(),
            status: self.status_at(now),
            created_at: self.created_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            last_used_at: self.last_used_at,
            rotated_from_id: self.rotated_from_id.clone(),
        }
    }
}

/// Safe-to-share projection of an [`ApiKeyRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeySummary {
    pub id: String,
    pub owner_id: String,
    pub name: Option<String>,
    pub key_prefix: String,
    pub scopes: BTreeSet<String>,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub rotated_from_id: Option<String>,
}

/// A freshly issued key: the only place the raw secret appears.
///
/// `Debug` omits the raw key.
pub struct IssuedKey {
    pub raw_key: String,
    pub record: ApiKeyRecord,
}

impl fmt::Debug for IssuedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedKey")
            .field("raw_key", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Generates a cryptographically secure API key with the `tg_` prefix.
///
/// Uses rejection sampling so every one of the 62 characters is equally likely; taking
/// `byte % 62` directly would favour the first 8 characters.
///
/// # Errors
///
/// Returns [`AuthError::KeyGenerationError`] if the system RNG fails.
pub fn generate_key() -> Result<String, AuthError> {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    #[allow(clippy::cast_possible_truncation)]
    const MAX_UNBIASED: u8 = (256 / CHARSET.len() * CHARSET.len() - 1) as u8;

    let rng = SystemRandom::new();
    let mut key = String::with_capacity(KEY_LENGTH);
    key.push_str(KEY_PREFIX);

    let mut buffer = [0u8; 64];
    while key.len() < KEY_LENGTH {
        rng.fill(&mut buffer).map_err(|_| {
            AuthError::KeyGenerationError("Failed to generate secure random bytes".to_string())
        })?;

        for byte in buffer.iter().copied().filter(|b| *b <= MAX_UNBIASED) {
            if key.len() == KEY_LENGTH {
                break;
            }
            key.push(char::from(CHARSET[usize::from(byte) % CHARSET.len()]));
        }
    }

    Ok(key)
}

/// Checks the shape of a presented key before any hashing work is done.
#[must_use]
pub fn is_valid_format(key: &str) -> bool {
    key.len() == KEY_LENGTH
        && key.starts_with(KEY_PREFIX)
        && key[KEY_PREFIX.len()..].bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Hex SHA-256 of the raw key.
///
/// A fast hash is acceptable here only because keys carry 256 bits of entropy; the Argon2
/// hash is what authenticates.
#[must_use]
pub fn compute_blind_index(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Display prefix stored on the record.
#[must_use]
pub fn display_prefix(key: &str) -> String {
    key.chars().take(DISPLAY_PREFIX_LENGTH).collect()
}

/// Argon2id hashing with a configurable work factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHasher {
    memory_kib: u32,
    iterations: u32,
}

impl KeyHasher {
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] when Argon2 rejects the parameters.
    pub fn new(memory_kib: u32, iterations: u32) -> Result<Self, AuthError> {
        let hasher = Self { memory_kib, iterations };
        hasher.params()?;
        Ok(hasher)
    }

    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] when Argon2 rejects the configured parameters.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(config.hash_memory_kib, config.hash_work_factor)
    }

    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    #[must_use]
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    fn params(&self) -> Result<Params, AuthError> {
        Params::new(self.memory_kib, self.iterations, HASH_PARALLELISM, Some(HASH_OUTPUT_LENGTH))
            .map_err(|e| AuthError::ConfigError(format!("Invalid Argon2 parameters: {e}")))
    }

    /// Hashes a raw key into a PHC string with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyGenerationError`] if salt generation or hashing fails.
    pub fn hash(&self, raw_key: &str) -> Result<String, AuthError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params()?);

        let mut salt_bytes = [0u8; 16];
        SystemRandom::new()
            .fill(&mut salt_bytes)
            .map_err(|_| AuthError::KeyGenerationError("Failed to generate salt".to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| {
            AuthError::KeyGenerationError(format!("Failed to encode salt: {e}"))
        })?;

        argon2
            .hash_password(raw_key.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::KeyGenerationError(format!("Failed to hash API key: {e}")))
    }

    /// Verifies a raw key against a stored PHC string.
    ///
    /// Parameters are read from the PHC string itself, so keys hashed under an older work
    /// factor keep verifying after the configuration changes. The digest comparison inside
    /// `argon2` is constant-time.
    #[must_use]
    pub fn verify(raw_key: &str, secret_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(secret_hash) else {
            return false;
        };
        Argon2::default().verify_password(raw_key.as_bytes(), &parsed).is_ok()
    }
}
