use super::{
    api_key::{self, ApiKeyRecord, ApiKeySummary, IssuedKey, KeyHasher, KeyStatus},
    repository::ApiKeyRepository,
    scope, AuthError,
};
use crate::{clock::SharedClock, config::AuthConfig, metrics};
use dashmap::{mapref::entry::Entry, DashMap};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

const MAX_OWNER_ID_LENGTH: usize = 128;

/// Default minimum spacing between `last_used_at` writes for one key.
pub const DEFAULT_LAST_USED_RESOLUTION: Duration = Duration::from_secs(60);

/// Overrides applied to the successor created by [`ApiKeyManager::rotate_with`].
#[derive(Debug, Clone, Default)]
pub struct RotateOptions {
    /// New label. `None` keeps the predecessor's; a blank string clears it.
    pub name: Option<String>,
    /// Lifetime of the successor. `None` applies the manager's default TTL.
    pub ttl: Option<Duration>,
}

/// Issues, validates, scopes, revokes and rotates API keys.
///
/// All writes to key records go through this type. `revoke` and `rotate` for the same key id
/// are serialized on a per-key lock; `validate` never takes that lock and reads whatever the
/// repository has committed.
pub struct ApiKeyManager {
    repository: Arc<dyn ApiKeyRepository>,
    hasher: KeyHasher,
    default_ttl: Option<Duration>,
    verification_ttl: Duration,
    /// Blind index -> last successful Argon2 verification
    verified: DashMap<String, VerifiedKey>,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Key id -> when `last_used_at` was last written
    usage_stamps: DashMap<String, Instant>,
    last_used_resolution: Duration,
    /// Hash of a throwaway key, verified against when a blind index is unknown
    dummy_hash: OnceCell<String>,
    clock: SharedClock,
}

struct VerifiedKey {
    secret_hash: String,
    verified_at: Instant,
}

impl ApiKeyManager {
    /// Creates a manager with no default expiry and no verification cache.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ApiKeyRepository>,
        hasher: KeyHasher,
        clock: SharedClock,
    ) -> Self {
        Self {
            repository,
            hasher,
            default_ttl: None,
            verification_ttl: Duration::ZERO,
            verified: DashMap::new(),
            key_locks: DashMap::new(),
            usage_stamps: DashMap::new(),
            last_used_resolution: DEFAULT_LAST_USED_RESOLUTION,
            dummy_hash: OnceCell::new(),
            clock,
        }
    }

    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] when the configured hash parameters are invalid.
    pub fn from_config(
        config: &AuthConfig,
        repository: Arc<dyn ApiKeyRepository>,
        clock: SharedClock,
    ) -> Result<Self, AuthError> {
        Ok(Self::new(repository, KeyHasher::from_config(config)?, clock)
            .with_default_ttl(config.default_ttl())
            .with_verification_cache_ttl(config.verification_cache_ttl()))
    }

    /// Lifetime applied when `issue` is called without a TTL. `None` issues non-expiring keys.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// How long a successful verification is trusted. Zero disables the cache.
    #[must_use]
    pub fn with_verification_cache_ttl(mut self, ttl: Duration) -> Self {
        self.verification_ttl = ttl;
        self
    }

    /// Minimum spacing between `last_used_at` writes for one key. Zero writes on every
    /// successful validation.
    #[must_use]
    pub fn with_last_used_resolution(mut self, resolution: Duration) -> Self {
        self.last_used_resolution = resolution;
        self
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn ApiKeyRepository> {
        &self.repository
    }

    /// Issues a new key for `owner_id`.
    ///
    /// # Errors
    ///
    /// See [`issue_named`](Self::issue_named).
    pub async fn issue<I, S>(
        &self,
        owner_id: &str,
        scopes: I,
        ttl: Option<Duration>,
    ) -> Result<IssuedKey, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.issue_named(owner_id, scopes, ttl, None).await
    }

    /// Issues a new key with an optional human label.
    ///
    /// The raw key in the returned [`IssuedKey`] is the only copy that will ever exist.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidOwner`] / [`AuthError::InvalidScope`] for malformed input
    /// - [`AuthError::ConfigError`] for a zero TTL
    /// - [`AuthError::KeyGenerationError`] / [`AuthError::DatabaseError`] on internal failure
    pub async fn issue_named<I, S>(
        &self,
        owner_id: &str,
        scopes: I,
        ttl: Option<Duration>,
        name: Option<String>,
    ) -> Result<IssuedKey, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        validate_owner_id(owner_id)?;
        let scopes = scope::normalize_scopes(scopes)?;
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        let now = self.clock.utc_now();
        let expires_at = match ttl.or(self.default_ttl) {
            Some(ttl) => Some(expiry_after(now, ttl)?),
            None => None,
        };

        let (raw_key, secret_hash) = self.new_key_material().await?;
        let record = ApiKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name,
            key_prefix: api_key::display_prefix(&raw_key),
            secret_hash,
            blind_index: api_key::compute_blind_index(&raw_key),
            scopes,
            created_at: now,
            expires_at,
            revoked_at: None,
            last_used_at: None,
            rotated_from_id: None,
        };

        self.repository.insert(&record).await?;

        info!(
            key_id = %record.id,
            owner_id = %record.owner_id,
            scopes = ?record.scopes,
            expires_at = ?record.expires_at,
            "api key issued"
        );
        metrics::record_key_issued();

        Ok(IssuedKey { raw_key, record })
    }

    /// Resolves a presented raw key to its active record.
    ///
    /// Every failure mode (malformed, unknown, wrong secret, expired, revoked) returns
    /// [`AuthError::InvalidCredential`]. An unknown key still pays for one Argon2
    /// verification so both paths cost the same.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredential`] for rejected keys; repository and hashing failures are
    /// passed through.
    pub async fn validate(&self, raw_key: &str) -> Result<ApiKeyRecord, AuthError> {
        if !api_key::is_valid_format(raw_key) {
            return Err(reject("malformed", None));
        }

        let blind_index = api_key::compute_blind_index(raw_key);
        let Some(mut record) = self.repository.find_by_blind_index(&blind_index).await? else {
            let dummy_hash = self.dummy_hash().await?;
            self.verify_blocking(raw_key, dummy_hash).await?;
            return Err(reject("unknown", None));
        };

        if !self.recently_verified(&record) {
            if !self.verify_blocking(raw_key, &record.secret_hash).await? {
                warn!(key_id = %record.id, "blind index matched but secret verification failed");
                return Err(reject("mismatch", Some(&record.id)));
            }
            self.remember_verified(&record);
        }

        match record.status_at(self.clock.utc_now()) {
            KeyStatus::Active => {
                self.record_usage(&mut record).await;
                Ok(record)
            }
            status => Err(reject(status.as_str(), Some(&record.id))),
        }
    }

    /// Stamps `last_used_at`, at most once per resolution window per key.
    ///
    /// Failures are logged and never fail the validation.
    async fn record_usage(&self, record: &mut ApiKeyRecord) {
        let now = self.clock.now();
        let due = match self.usage_stamps.entry(record.id.clone()) {
            Entry::Occupied(entry)
                if now.saturating_duration_since(*entry.get()) < self.last_used_resolution =>
            {
                false
            }
            Entry::Occupied(mut entry) => {
                entry.insert(now);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };
        if !due {
            return;
        }

        let at = self.clock.utc_now();
        match self.repository.update_last_used(&record.id, at).await {
            Ok(()) => record.last_used_at = Some(at),
            Err(e) => warn!(key_id = %record.id, error = %e, "failed to record key usage"),
        }
    }

    /// Returns whether `record` carries a scope that grants `required`.
    #[must_use]
    pub fn check_scope(&self, record: &ApiKeyRecord, required: &str) -> bool {
        scope::check_scope(&record.scopes, required)
    }

    /// Revokes a key. Revoking an already revoked key returns it unchanged.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeyNotFound`] for an unknown id.
    pub async fn revoke(&self, key_id: &str) -> Result<ApiKeySummary, AuthError> {
        let lock = self.key_lock(key_id);
        let guard = lock.lock().await;
        let result = self.revoke_locked(key_id).await;
        drop(guard);
        self.release_key_lock(key_id, lock);
        result
    }

    async fn revoke_locked(&self, key_id: &str) -> Result<ApiKeySummary, AuthError> {
        let existing = self
            .repository
            .find_by_id(key_id)
            .await?
            .ok_or_else(|| AuthError::KeyNotFound(key_id.to_string()))?;

        let now = self.clock.utc_now();
        if existing.revoked_at.is_some() {
            debug!(key_id = %key_id, "api key already revoked");
            return Ok(existing.summary(now));
        }

        let record = self
            .repository
            .revoke(key_id, now)
            .await?
            .ok_or_else(|| AuthError::KeyNotFound(key_id.to_string()))?;
        self.verified.remove(&record.blind_index);

        info!(key_id = %key_id, owner_id = %record.owner_id, "api key revoked");
        metrics::record_key_revoked();

        Ok(record.summary(now))
    }

    /// Replaces an active key with a successor carrying the same owner, scopes and name.
    ///
    /// # Errors
    ///
    /// See [`rotate_with`](Self::rotate_with).
    pub async fn rotate(&self, key_id: &str) -> Result<IssuedKey, AuthError> {
        self.rotate_with(key_id, RotateOptions::default()).await
    }

    /// Replaces an active key with a successor carrying the same owner and scopes.
    ///
    /// `options` may relabel the successor or give it a TTL other than the default.
    ///
    /// The predecessor is revoked and the successor inserted in one repository transaction,
    /// so there is no instant at which both or neither are valid.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyNotFound`] for an unknown id
    /// - [`AuthError::AlreadyRotated`] when the key was rotated before (including by a
    ///   concurrent caller)
    /// - [`AuthError::KeyRevoked`] when the key was revoked without a successor
    /// - [`AuthError::KeyExpired`] when the key has expired
    /// - [`AuthError::ConfigError`] for a zero TTL override
    pub async fn rotate_with(
        &self,
        key_id: &str,
        options: RotateOptions,
    ) -> Result<IssuedKey, AuthError> {
        let lock = self.key_lock(key_id);
        let guard = lock.lock().await;
        let result = self.rotate_locked(key_id, options).await;
        drop(guard);
        self.release_key_lock(key_id, lock);
        result
    }

    async fn rotate_locked(
        &self,
        key_id: &str,
        options: RotateOptions,
    ) -> Result<IssuedKey, AuthError> {
        let current = self
            .repository
            .find_by_id(key_id)
            .await?
            .ok_or_else(|| AuthError::KeyNotFound(key_id.to_string()))?;

        let now = self.clock.utc_now();
        match current.status_at(now) {
            KeyStatus::Active => {}
            KeyStatus::Revoked => return Err(self.revoked_error(key_id).await?),
            KeyStatus::Expired => return Err(AuthError::KeyExpired(key_id.to_string())),
        }

        let expires_at = match options.ttl.or(self.default_ttl) {
            Some(ttl) => Some(expiry_after(now, ttl)?),
            None => None,
        };
        let name = match options.name {
            Some(name) => Some(name.trim().to_string()).filter(|n| !n.is_empty()),
            None => current.name.clone(),
        };
        let (raw_key, secret_hash) = self.new_key_material().await?;
        let successor = ApiKeyRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: current.owner_id.clone(),
            name,
            key_prefix: api_key::display_prefix(&raw_key),
            secret_hash,
            blind_index: api_key::compute_blind_index(&raw_key),
            scopes: current.scopes.clone(),
            created_at: now,
            expires_at,
            revoked_at: None,
            last_used_at: None,
            rotated_from_id: Some(key_id.to_string()),
        };

        if !self.repository.rotate(key_id, &successor, now).await? {
            // Revoked by another process between the read and the transaction.
            return Err(self.revoked_error(key_id).await?);
        }
        self.verified.remove(&current.blind_index);

        info!(
            key_id = %key_id,
            successor_id = %successor.id,
            owner_id = %successor.owner_id,
            "api key rotated"
        );
        metrics::record_key_rotated();

        Ok(IssuedKey { raw_key, record: successor })
    }

    async fn revoked_error(&self, key_id: &str) -> Result<AuthError, AuthError> {
        Ok(match self.repository.find_successor(key_id).await? {
            Some(successor) => AuthError::AlreadyRotated {
                key_id: key_id.to_string(),
                successor_id: successor.id,
            },
            None => AuthError::KeyRevoked(key_id.to_string()),
        })
    }

    /// # Errors
    ///
    /// [`AuthError::KeyNotFound`] for an unknown id.
    pub async fn get(&self, key_id: &str) -> Result<ApiKeySummary, AuthError> {
        self.repository
            .find_by_id(key_id)
            .await?
            .map(|record| record.summary(self.clock.utc_now()))
            .ok_or_else(|| AuthError::KeyNotFound(key_id.to_string()))
    }

    /// # Errors
    ///
    /// Repository failures only.
    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<ApiKeySummary>, AuthError> {
        let now = self.clock.utc_now();
        Ok(self
            .repository
            .list_by_owner(owner_id)
            .await?
            .iter()
            .map(|record| record.summary(now))
            .collect())
    }

    /// # Errors
    ///
    /// Repository failures only.
    pub async fn list_all(&self) -> Result<Vec<ApiKeySummary>, AuthError> {
        let now = self.clock.utc_now();
        Ok(self.repository.list_all().await?.iter().map(|record| record.summary(now)).collect())
    }

    /// The key that replaced `key_id` through rotation, if any.
    ///
    /// # Errors
    ///
    /// Repository failures only.
    pub async fn successor_of(&self, key_id: &str) -> Result<Option<ApiKeySummary>, AuthError> {
        let now = self.clock.utc_now();
        Ok(self.repository.find_successor(key_id).await?.map(|record| record.summary(now)))
    }

    /// Deletes keys that were revoked or expired more than `older_than` ago.
    ///
    /// # Errors
    ///
    /// Repository failures only.
    pub async fn purge_expired(&self, older_than: Duration) -> Result<u64, AuthError> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| self.clock.utc_now().checked_sub_signed(age))
            .ok_or_else(|| AuthError::ConfigError("retention period is too large".to_string()))?;

        let deleted = self.repository.delete_inactive_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "purged inactive api keys");
        }
        Ok(deleted)
    }

    /// Drops expired verification cache entries. Returns the number removed.
    ///
    /// Usage stamps older than the `last_used_at` resolution are dropped too; they are not
    /// counted.
    pub fn prune_verification_cache(&self) -> usize {
        let now = self.clock.now();
        self.usage_stamps.retain(|_, stamped| {
            now.saturating_duration_since(*stamped) < self.last_used_resolution
        });
        let before = self.verified.len();
        self.verified.retain(|_, entry| {
            now.saturating_duration_since(entry.verified_at) < self.verification_ttl
        });
        before.saturating_sub(self.verified.len())
    }

    async fn new_key_material(&self) -> Result<(String, String), AuthError> {
        let raw_key = api_key::generate_key()?;
        let hasher = self.hasher;
        let to_hash = raw_key.clone();
        let secret_hash = tokio::task::spawn_blocking(move || hasher.hash(&to_hash)).await??;
        Ok((raw_key, secret_hash))
    }

    async fn verify_blocking(&self, raw_key: &str, secret_hash: &str) -> Result<bool, AuthError> {
        let raw_key = raw_key.to_string();
        let secret_hash = secret_hash.to_string();
        Ok(tokio::task::spawn_blocking(move || KeyHasher::verify(&raw_key, &secret_hash)).await?)
    }

    async fn dummy_hash(&self) -> Result<&str, AuthError> {
        let hasher = self.hasher;
        self.dummy_hash
            .get_or_try_init(|| async move {
                let throwaway = api_key::generate_key()?;
                tokio::task::spawn_blocking(move || hasher.hash(&throwaway)).await?
            })
            .await
            .map(String::as_str)
    }

    fn recently_verified(&self, record: &ApiKeyRecord) -> bool {
        if self.verification_ttl.is_zero() {
            return false;
        }
        let now = self.clock.now();
        self.verified.get(&record.blind_index).is_some_and(|entry| {
            entry.secret_hash == record.secret_hash
                && now.saturating_duration_since(entry.verified_at) < self.verification_ttl
        })
    }

    fn remember_verified(&self, record: &ApiKeyRecord) {
        if self.verification_ttl.is_zero() {
            return;
        }
        self.verified.insert(
            record.blind_index.clone(),
            VerifiedKey { secret_hash: record.secret_hash.clone(), verified_at: self.clock.now() },
        );
    }

    fn key_lock(&self, key_id: &str) -> Arc<Mutex<()>> {
        self.key_locks.entry(key_id.to_string()).or_default().clone()
    }

    /// Drops the per-key lock once no other caller holds a handle to it.
    fn release_key_lock(&self, key_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.key_locks.remove_if(key_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn reject(reason: &'static str, key_id: Option<&str>) -> AuthError {
    match key_id {
        Some(key_id) => debug!(reason, key_id = %key_id, "credential rejected"),
        None => debug!(reason, "credential rejected"),
    }
    metrics::record_auth_failure(reason);
    AuthError::InvalidCredential
}

fn validate_owner_id(owner_id: &str) -> Result<(), AuthError> {
    if owner_id.is_empty()
        || owner_id.len() > MAX_OWNER_ID_LENGTH
        || owner_id.trim() != owner_id
        || owner_id.chars().any(char::is_control)
    {
        return Err(AuthError::InvalidOwner);
    }
    Ok(())
}

fn expiry_after(
    now: chrono::DateTime<chrono::Utc>,
    ttl: Duration,
) -> Result<chrono::DateTime<chrono::Utc>, AuthError> {
    if ttl.is_zero() {
        return Err(AuthError::ConfigError("key TTL must be positive".to_string()));
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::ConfigError("key TTL is too large".to_string()))
}
