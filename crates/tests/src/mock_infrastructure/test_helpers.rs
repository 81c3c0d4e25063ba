//! Fixtures shared by the integration tests.

use std::sync::Arc;
use tollgate_core::{
    auth::{api_key::MIN_HASH_MEMORY_KIB, InMemoryRepository},
    backend::AiBackend,
    clock::ManualClock,
    config::AppConfig,
    runtime::TollgateRuntime,
};

/// Default config with the cheapest accepted Argon2 parameters.
#[must_use]
pub fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.hash_work_factor = 1;
    config.auth.hash_memory_kib = MIN_HASH_MEMORY_KIB;
    config
}

/// Runtime over an in-memory key store, driven by `clock`, without a background sweeper.
///
/// # Panics
///
/// Panics if the runtime fails to build.
pub async fn build_runtime(
    config: AppConfig,
    backend: Arc<dyn AiBackend>,
    clock: Arc<ManualClock>,
) -> TollgateRuntime {
    TollgateRuntime::builder()
        .with_config(config)
        .with_backend(backend)
        .with_repository(Arc::new(InMemoryRepository::new()))
        .with_clock(clock)
        .disable_sweeper()
        .build()
        .await
        .expect("Failed to build runtime")
}

/// Issues a key for `owner` and returns the raw secret.
///
/// # Panics
///
/// Panics if issuing fails.
pub async fn issue_key(runtime: &TollgateRuntime, owner: &str, scopes: &[&str]) -> String {
    runtime.keys().issue(owner, scopes, None).await.expect("Failed to issue key").raw_key
}
