//! Runtime lifecycle: sweeper task ownership and graceful shutdown.

use crate::{
    auth::ApiKeyManager,
    cache::ContentCache,
    config::AppConfig,
    middleware::{AccessMiddleware, TokenBucketLimiter},
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{
    builder::TollgateRuntimeBuilder,
    sweeper::{self, SweepReport},
    TollgateComponents,
};

/// Owns the access-layer components and their background sweeper.
///
/// `shutdown()` broadcasts on the shutdown channel and waits for the sweeper to exit. It is
/// idempotent: later calls return immediately.
pub struct TollgateRuntime {
    components: TollgateComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    sweeper_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_initiated: AtomicBool,
}

impl TollgateRuntime {
    #[must_use]
    pub fn builder() -> TollgateRuntimeBuilder {
        TollgateRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: TollgateComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        enable_sweeper: bool,
    ) -> Self {
        let sweeper_task = if enable_sweeper {
            let handle = tokio::spawn(sweeper::run_sweeper(
                components.clone(),
                config.cache.sweep_interval(),
                shutdown_tx.subscribe(),
            ));
            debug!("Sweeper task started");
            Some(handle)
        } else {
            None
        };

        Self {
            components,
            shutdown_tx,
            config,
            sweeper_task: Mutex::new(sweeper_task),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn components(&self) -> &TollgateComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn access(&self) -> &Arc<AccessMiddleware> {
        self.components.access()
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<ApiKeyManager> {
        self.components.keys()
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        self.components.limiter()
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ContentCache> {
        self.components.cache()
    }

    /// Whether a sweeper task is still owned by this runtime.
    #[must_use]
    pub fn has_sweeper(&self) -> bool {
        self.sweeper_task.lock().is_some()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Runs one sweep on the caller's task, independent of the background schedule.
    pub fn sweep_now(&self) -> SweepReport {
        sweeper::sweep_once(&self.components)
    }

    /// Creates a receiver that fires when the runtime shuts down.
    ///
    /// Useful for tying custom background tasks to the runtime's lifetime.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals the sweeper to stop and waits for it.
    pub async fn shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating tollgate runtime shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!(error = %e, "Shutdown signal had no receivers");
        }

        let sweeper_task = self.sweeper_task.lock().take();
        if let Some(task) = sweeper_task {
            match task.await {
                Ok(()) => debug!("Sweeper task completed"),
                Err(e) if e.is_cancelled() => debug!("Sweeper task cancelled"),
                Err(e) => error!(error = %e, "Sweeper task failed"),
            }
        }

        info!("Tollgate runtime shutdown complete");
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<TollgateRuntime>;
    let _ = assert_sync::<TollgateRuntime>;
};
