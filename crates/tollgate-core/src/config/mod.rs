//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: the `default_*` functions and `Default` implementations below
//! 2. **Config file**: TOML file named by the `TOLLGATE_CONFIG` env var (optional)
//! 3. **Environment variables**: `TOLLGATE__SECTION__FIELD` overrides specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP server settings (bind address, concurrency, body limit)
//! - [`RateLimitConfig`]: token bucket capacity and refill window
//! - [`CacheConfig`]: response cache TTL and sweep cadence
//! - [`AuthConfig`]: API key storage, hashing cost and default lifetime
//! - [`UpstreamConfig`]: the AI backend the access layer fronts
//! - [`MetricsConfig`] and [`LoggingConfig`]
//!
//! All options are read once at startup and validated with [`AppConfig::validate`]; there is no
//! runtime mutation API.
//!
//! # Example
//!
//! ```toml
//! [rate_limit]
//! capacity = 5
//! window_seconds = 60
//!
//! [cache]
//! ttl_seconds = 3600
//! sweep_interval_seconds = 300
//!
//! [auth]
//! database_url = "sqlite://./db/tollgate.db"
//! default_ttl_days = 30
//! hash_work_factor = 3
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Upper bound for every configured duration: ten years.
///
/// Keeps `Instant + duration` arithmetic on the request path representable.
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of requests processed concurrently. Defaults to `100`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Whole-request timeout in seconds. Defaults to `60`.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Largest accepted request body. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3030
}

fn default_max_concurrent_requests() -> usize {
    100
}

fn default_request_timeout_seconds() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Token bucket settings shared by every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tokens per bucket, which is also the burst size. Defaults to `10`.
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: u32,

    /// Seconds for an empty bucket to refill completely. Defaults to `60`.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub window_seconds: u64,

    /// Upper bound on tracked clients. Defaults to `100_000`.
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,

    /// Buckets idle for this many windows are evicted by the sweeper. Must be at least `1`.
    /// Defaults to `2`.
    #[serde(default = "default_idle_window_multiplier")]
    pub idle_window_multiplier: u32,
}

fn default_rate_limit_capacity() -> u32 {
    10
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_max_buckets() -> usize {
    100_000
}

fn default_idle_window_multiplier() -> u32 {
    2
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    #[must_use]
    pub fn idle_ttl(&self) -> Duration {
        self.window().saturating_mul(self.idle_window_multiplier)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether AI responses are cached at all. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Absolute lifetime of a cached response in seconds. Defaults to `3600`.
    #[serde(default = "default_cache_ttl_seconds")]
    pub ttl_seconds: u64,

    /// How often the sweeper purges expired entries and idle buckets. Must be shorter than the
    /// TTL. Defaults to `300`.
    #[serde(default = "default_cache_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Whether concurrent identical misses share one backend call. Defaults to `true`.
    #[serde(default = "default_true")]
    pub dedupe_inflight: bool,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_cache_sweep_interval_seconds() -> u64 {
    300
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// API key storage and hashing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `SQLite` database URL for API key records. Defaults to `sqlite://./db/tollgate.db`.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Lifetime of newly issued keys in days; `0` issues non-expiring keys. Defaults to `90`.
    #[serde(default = "default_api_key_ttl_days")]
    pub default_ttl_days: u32,

    /// Argon2id iteration count (time cost). Defaults to `3`.
    #[serde(default = "default_hash_work_factor")]
    pub hash_work_factor: u32,

    /// Argon2id memory cost in KiB. Defaults to `65536` (64 MiB).
    #[serde(default = "default_hash_memory_kib")]
    pub hash_memory_kib: u32,

    /// How long a successful Argon2 verification is remembered per key. `0` disables the
    /// verification cache. Defaults to `60`.
    #[serde(default = "default_verification_cache_ttl_seconds")]
    pub verification_cache_ttl_seconds: u64,

    /// Token required in `X-Admin-Token` for the key management API. When unset the admin API
    /// is not mounted.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_database_url() -> String {
    "sqlite://./db/tollgate.db".to_string()
}

fn default_api_key_ttl_days() -> u32 {
    90
}

fn default_hash_work_factor() -> u32 {
    3
}

fn default_hash_memory_kib() -> u32 {
    65536
}

fn default_verification_cache_ttl_seconds() -> u64 {
    60
}

impl AuthConfig {
    /// Default lifetime for new keys, `None` when keys do not expire.
    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_days > 0)
            .then(|| Duration::from_secs(u64::from(self.default_ttl_days) * 24 * 60 * 60))
    }

    #[must_use]
    pub fn verification_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.verification_cache_ttl_seconds)
    }
}

/// The AI backend fronted by the access layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL; requests are posted to `{url}/{operation}`.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Credential sent to the backend as a bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for a single backend call in seconds. Defaults to `30`.
    #[serde(default = "default_upstream_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_upstream_url() -> String {
    "http://127.0.0.1:8081/v1".to_string()
}

fn default_upstream_timeout_seconds() -> u64 {
    30
}

fn default_model() -> String {
    "default".to_string()
}

impl UpstreamConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Prometheus metrics configuration. When enabled, metrics are served at `/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled. Defaults to `true`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Application logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "trace", "debug", "info", "warn", "error"). Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration containing all subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g., "development", "production"). Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_rate_limit_capacity(),
            window_seconds: default_rate_limit_window_seconds(),
            max_buckets: default_max_buckets(),
            idle_window_multiplier: default_idle_window_multiplier(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl_seconds(),
            sweep_interval_seconds: default_cache_sweep_interval_seconds(),
            dedupe_inflight: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            default_ttl_days: default_api_key_ttl_days(),
            hash_work_factor: default_hash_work_factor(),
            hash_memory_kib: default_hash_memory_kib(),
            verification_cache_ttl_seconds: default_verification_cache_ttl_seconds(),
            admin_token: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            api_key: None,
            timeout_seconds: default_upstream_timeout_seconds(),
            default_model: default_model(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// Environment variables with the `TOLLGATE__` prefix override any value, using `__` as
    /// the separator for nested fields (e.g. `TOLLGATE__RATE_LIMIT__CAPACITY=20`). A missing
    /// file is not an error; compiled defaults apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or a value has the wrong type.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("TOLLGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the path in `TOLLGATE_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("TOLLGATE_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string for the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }

        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }

        if self.server.max_body_bytes == 0 {
            return Err("Max body size must be greater than 0".to_string());
        }

        if self.rate_limit.capacity == 0 {
            return Err("Rate limit capacity must be greater than 0".to_string());
        }

        if self.rate_limit.window_seconds == 0 {
            return Err("Rate limit window must be greater than 0".to_string());
        }

        if self.rate_limit.window_seconds > MAX_DURATION_SECONDS {
            return Err(format!(
                "Rate limit window must not exceed {MAX_DURATION_SECONDS}s"
            ));
        }

        if self.rate_limit.max_buckets == 0 {
            return Err("Rate limit max buckets must be greater than 0".to_string());
        }

        if self.rate_limit.idle_window_multiplier == 0 {
            return Err("Idle window multiplier must be at least 1".to_string());
        }

        if self.cache.ttl_seconds == 0 {
            return Err("Cache TTL must be greater than 0".to_string());
        }

        if self.cache.ttl_seconds > MAX_DURATION_SECONDS {
            return Err(format!("Cache TTL must not exceed {MAX_DURATION_SECONDS}s"));
        }

        if self.cache.sweep_interval_seconds == 0 {
            return Err("Cache sweep interval must be greater than 0".to_string());
        }

        if self.cache.sweep_interval_seconds >= self.cache.ttl_seconds {
            return Err(format!(
                "Cache sweep interval ({}s) must be shorter than the cache TTL ({}s)",
                self.cache.sweep_interval_seconds, self.cache.ttl_seconds
            ));
        }

        if self.auth.database_url.is_empty() {
            return Err("Auth database URL must not be empty".to_string());
        }

        if self.auth.hash_work_factor == 0 {
            return Err("API key hash work factor must be at least 1".to_string());
        }

        if self.auth.hash_memory_kib < crate::auth::api_key::MIN_HASH_MEMORY_KIB {
            return Err(format!(
                "API key hash memory must be at least {} KiB",
                crate::auth::api_key::MIN_HASH_MEMORY_KIB
            ));
        }

        if matches!(self.auth.admin_token.as_deref(), Some(t) if t.len() < 16) {
            return Err("Admin token must be at least 16 characters".to_string());
        }

        if !self.upstream.url.starts_with("http") {
            return Err(format!("Invalid upstream URL: {}", self.upstream.url));
        }

        if self.upstream.timeout_seconds == 0 {
            return Err("Upstream timeout must be greater than 0".to_string());
        }

        if self.upstream.timeout_seconds > MAX_DURATION_SECONDS
            || self.server.request_timeout_seconds > MAX_DURATION_SECONDS
            || self.auth.verification_cache_ttl_seconds > MAX_DURATION_SECONDS
        {
            return Err(format!("Timeouts and TTLs must not exceed {MAX_DURATION_SECONDS}s"));
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }
}
