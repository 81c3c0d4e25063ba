//! Runtime lifecycle integration tests.
//!
//! Builder validation, the background sweeper, and shutdown signalling as seen from outside the
//! core crate.

use crate::mock_infrastructure::{build_runtime, fast_config, issue_key, MockBackend};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tollgate_core::{
    auth::{AuthError, InMemoryRepository},
    backend::{AiRequest, Operation},
    clock::ManualClock,
    runtime::{RuntimeError, SweepReport, TollgateRuntime},
};

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let mut config = fast_config();
    config.cache.ttl_seconds = 60;
    config.cache.sweep_interval_seconds = 60;

    let result = TollgateRuntime::builder()
        .with_config(config)
        .with_backend(MockBackend::ok())
        .with_repository(Arc::new(InMemoryRepository::new()))
        .build()
        .await;

    assert!(matches!(result, Err(RuntimeError::ConfigValidation(_))));
}

#[tokio::test]
async fn test_builder_requires_backend() {
    let result = TollgateRuntime::builder()
        .with_config(fast_config())
        .with_repository(Arc::new(InMemoryRepository::new()))
        .build()
        .await;

    assert!(matches!(result, Err(RuntimeError::MissingBackend)));
}

#[tokio::test]
async fn test_builder_reports_unusable_database() {
    let mut config = fast_config();
    config.auth.database_url = "postgres://localhost/keys".to_string();

    let result =
        TollgateRuntime::builder().with_config(config).with_backend(MockBackend::ok()).build().await;

    assert!(matches!(result, Err(RuntimeError::Auth(AuthError::DatabaseError(_)))));
}

#[tokio::test]
async fn test_sweep_clears_all_expired_state() {
    let clock = Arc::new(ManualClock::new());
    let mut config = fast_config();
    config.cache.ttl_seconds = 60;
    config.cache.sweep_interval_seconds = 30;
    let runtime = build_runtime(config, MockBackend::ok(), clock.clone()).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;

    runtime.access().handle(Some(&key), &AiRequest::new(Operation::Analyze, "x")).await.unwrap();
    assert_eq!(runtime.cache().len(), 1);
    assert_eq!(runtime.limiter().bucket_count(), 1);

    clock.advance(Duration::from_secs(121));
    let report = runtime.sweep_now();

    assert_eq!(
        report,
        SweepReport { expired_entries: 1, idle_buckets: 1, stale_verifications: 1 }
    );
    assert!(runtime.cache().is_empty());
    assert_eq!(runtime.limiter().bucket_count(), 0);
    assert_eq!(runtime.sweep_now(), SweepReport::default());
}

#[tokio::test]
async fn test_shutdown_notifies_every_receiver() {
    let runtime = build_runtime(fast_config(), MockBackend::ok(), Arc::new(ManualClock::new())).await;

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let mut rx = runtime.shutdown_receiver();
            tokio::spawn(async move { rx.recv().await.is_ok() })
        })
        .collect();

    runtime.shutdown().await;

    for waiter in waiters {
        let notified = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(notified);
    }
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_stops_on_shutdown() {
    let clock = Arc::new(ManualClock::new());
    let mut config = fast_config();
    config.cache.ttl_seconds = 60;
    config.cache.sweep_interval_seconds = 10;

    let runtime = TollgateRuntime::builder()
        .with_config(config)
        .with_backend(MockBackend::ok())
        .with_repository(Arc::new(InMemoryRepository::new()))
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();
    assert!(runtime.has_sweeper());

    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;
    runtime.access().handle(Some(&key), &AiRequest::new(Operation::Analyze, "x")).await.unwrap();
    clock.advance(Duration::from_secs(61));

    for _ in 0..5 {
        if runtime.cache().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    assert!(runtime.cache().is_empty());

    timeout(Duration::from_secs(5), runtime.shutdown()).await.unwrap();
    assert!(runtime.is_shutdown());
    assert!(!runtime.has_sweeper());
}
