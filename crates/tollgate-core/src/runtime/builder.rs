//! Builder for initializing the runtime with configurable components.

use crate::{
    auth::{ApiKeyManager, ApiKeyRepository, AuthError, SqliteRepository},
    backend::AiBackend,
    cache::ContentCache,
    clock::{SharedClock, SystemClock},
    config::AppConfig,
    middleware::{AccessMiddleware, TokenBucketLimiter},
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{lifecycle::TollgateRuntime, TollgateComponents};

/// Errors that can occur during runtime initialization.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// No [`AiBackend`] was supplied to the builder.
    #[error("No AI backend configured")]
    MissingBackend,

    /// Opening the key store or applying the hash parameters failed.
    #[error("Key manager initialization failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Clone)]
struct RuntimeOptions {
    enable_sweeper: bool,
    shutdown_channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { enable_sweeper: true, shutdown_channel_capacity: 16 }
    }
}

/// Builder for constructing a [`TollgateRuntime`].
///
/// A configuration and a backend are required. The key repository defaults to SQLite at
/// `auth.database_url` and the clock defaults to [`SystemClock`].
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tollgate_core::{backend::AiBackend, config::AppConfig, runtime::TollgateRuntimeBuilder};
/// # async fn example(backend: Arc<dyn AiBackend>) -> Result<(), Box<dyn std::error::Error>> {
/// let runtime = TollgateRuntimeBuilder::new()
///     .with_config(AppConfig::load()?)
///     .with_backend(backend)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TollgateRuntimeBuilder {
    config: Option<AppConfig>,
    backend: Option<Arc<dyn AiBackend>>,
    repository: Option<Arc<dyn ApiKeyRepository>>,
    clock: Option<SharedClock>,
    options: RuntimeOptions,
}

impl TollgateRuntimeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            backend: None,
            repository: None,
            clock: None,
            options: RuntimeOptions::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn AiBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Uses the given repository instead of opening `auth.database_url`.
    #[must_use]
    pub fn with_repository(mut self, repository: Arc<dyn ApiKeyRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Skips the background sweeper. Expired entries are then only removed lazily on access.
    #[must_use]
    pub fn disable_sweeper(mut self) -> Self {
        self.options.enable_sweeper = false;
        self
    }

    /// Sets custom shutdown channel capacity (default: 16).
    #[must_use]
    pub fn with_shutdown_channel_capacity(mut self, capacity: usize) -> Self {
        self.options.shutdown_channel_capacity = capacity;
        self
    }

    /// Builds every component and starts the sweeper.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError`] if the configuration is missing or invalid, no backend was
    /// supplied, or the key store cannot be opened.
    pub async fn build(self) -> Result<TollgateRuntime, RuntimeError> {
        let config = self.config.ok_or_else(|| {
            RuntimeError::ConfigValidation("No configuration provided".to_string())
        })?;
        config.validate().map_err(RuntimeError::ConfigValidation)?;

        let backend = self.backend.ok_or(RuntimeError::MissingBackend)?;

        info!(
            rate_limit_capacity = config.rate_limit.capacity,
            rate_limit_window_secs = config.rate_limit.window_seconds,
            cache_enabled = config.cache.enabled,
            cache_ttl_secs = config.cache.ttl_seconds,
            sweeper_enabled = self.options.enable_sweeper,
            "Initializing tollgate runtime"
        );

        let clock = self.clock.unwrap_or_else(SystemClock::shared);

        let repository: Arc<dyn ApiKeyRepository> = match self.repository {
            Some(repository) => repository,
            None => Arc::new(SqliteRepository::new(&config.auth.database_url).await?),
        };
        debug!("Key repository initialized");

        let keys = Arc::new(ApiKeyManager::from_config(&config.auth, repository, clock.clone())?);
        debug!("API key manager initialized");

        let limiter = Arc::new(TokenBucketLimiter::from_config(&config.rate_limit, clock.clone()));
        debug!("Rate limiter initialized");

        let cache = Arc::new(ContentCache::from_config(&config.cache, clock.clone()));
        debug!("Content cache initialized");

        let access = Arc::new(AccessMiddleware::new(
            keys.clone(),
            limiter.clone(),
            cache.clone(),
            backend,
        ));

        let components = TollgateComponents::new(clock, keys, limiter, cache, access);
        let (shutdown_tx, _) = broadcast::channel::<()>(self.options.shutdown_channel_capacity);

        let runtime = TollgateRuntime::new(
            components,
            shutdown_tx,
            config,
            self.options.enable_sweeper,
        );

        info!("Tollgate runtime initialization complete");

        Ok(runtime)
    }
}

impl Default for TollgateRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
