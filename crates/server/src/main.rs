use anyhow::{Context, Result};
use axum::serve;
use server::{create_app, prometheus, HttpAiBackend};
use std::{net::SocketAddr, sync::Arc};
use tokio::signal;
use tollgate_core::{config::AppConfig, runtime::TollgateRuntime};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "warn,tollgate_core=info,server=info,audit=info";

/// Initializes logging from the configuration. `RUST_LOG` overrides the configured level;
/// `debug` and `trace` are widened to every tollgate crate.
fn init_logging(config: &AppConfig) {
    let crate_filter = |level: &str| {
        EnvFilter::new(format!("warn,tollgate_core={level},server={level},audit={level}"))
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(level) if level == "debug" || level == "trace" => crate_filter(&level),
        Ok(_) => EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        Err(_) if config.logging.level != "info" => crate_filter(&config.logging.level),
        Err(_) => EnvFilter::new(DEFAULT_FILTER),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!(environment = %config.environment, "Starting tollgate");
    debug!(
        bind_port = config.server.bind_port,
        upstream = %config.upstream.url,
        admin_api = config.auth.admin_token.is_some(),
        "Configuration loaded"
    );

    let metrics = config.metrics.enabled.then(prometheus::install_recorder);

    let backend = HttpAiBackend::from_config(&config.upstream)
        .map_err(|e| anyhow::anyhow!("Upstream client initialization failed: {e}"))?;

    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;

    let runtime = TollgateRuntime::builder()
        .with_config(config)
        .with_backend(Arc::new(backend))
        .build()
        .await
        .context("runtime initialization failed")?;

    let app = create_app(&runtime, metrics);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "tollgate listening");

    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    runtime.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
