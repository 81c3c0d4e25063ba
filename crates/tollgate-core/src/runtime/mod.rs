//! Runtime initialization and lifecycle management.
//!
//! [`TollgateRuntime`] builds every access-layer component once, wires them into an
//! [`AccessMiddleware`](crate::middleware::AccessMiddleware), and owns the background sweeper
//! that keeps the cache and the bucket table bounded. Both the HTTP server and embedded users
//! go through the same builder.
//!
//! # Examples
//!
//! ## Server Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_core::{backend::AiBackend, config::AppConfig, runtime::TollgateRuntime};
//!
//! async fn run(backend: Arc<dyn AiBackend>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = TollgateRuntime::builder()
//!         .with_config(config)
//!         .with_backend(backend)
//!         .build()
//!         .await?;
//!
//!     let access = runtime.access().clone();
//!     // ... mount HTTP routes around `access` ...
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Embedded Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tollgate_core::{
//!     auth::InMemoryRepository, backend::AiBackend, config::AppConfig, runtime::TollgateRuntime,
//! };
//!
//! async fn run(backend: Arc<dyn AiBackend>) -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TollgateRuntime::builder()
//!         .with_config(AppConfig::default())
//!         .with_backend(backend)
//!         .with_repository(Arc::new(InMemoryRepository::new()))
//!         .disable_sweeper()
//!         .build()
//!         .await?;
//!
//!     let issued = runtime.keys().issue("svc-reports", ["ai:*"], None).await?;
//!     // hand `issued.raw_key` to the caller once
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;
mod sweeper;

pub use builder::{RuntimeError, TollgateRuntimeBuilder};
pub use components::TollgateComponents;
pub use lifecycle::TollgateRuntime;
pub use sweeper::SweepReport;
