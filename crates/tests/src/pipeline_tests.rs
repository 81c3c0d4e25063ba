//! Access pipeline integration tests.
//!
//! Drive a full runtime (keys, limiter, cache, backend) through `AccessMiddleware::handle` with
//! a manual clock, checking stage order and the outcome of each stage.

use crate::mock_infrastructure::{build_runtime, fast_config, issue_key, MockBackend};
use std::{sync::Arc, time::Duration};
use tollgate_core::{
    backend::{AiRequest, Operation, UpstreamError},
    cache::CacheStatus,
    clock::ManualClock,
    middleware::AccessError,
};

fn analyze(content: &str) -> AiRequest {
    AiRequest::new(Operation::Analyze, content)
}

#[tokio::test]
async fn test_five_allowed_then_denied_with_twelve_second_retry() {
    let mut config = fast_config();
    config.rate_limit.capacity = 5;
    config.rate_limit.window_seconds = 60;
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(config, MockBackend::ok(), clock.clone()).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;

    for expected_remaining in (0..5).rev() {
        let served = runtime.access().handle(Some(&key), &analyze("x")).await.unwrap();
        assert_eq!(served.rate.remaining, expected_remaining);
        assert_eq!(served.rate.limit, 5);
    }

    let denied = runtime.access().handle(Some(&key), &analyze("x")).await.unwrap_err();
    assert!(
        matches!(denied, AccessError::RateLimited { retry_after_secs: 12, limit: 5, .. }),
        "{denied:?}"
    );

    clock.advance(Duration::from_secs(12));
    assert!(runtime.access().handle(Some(&key), &analyze("x")).await.is_ok());
}

#[tokio::test]
async fn test_cache_ttl_boundary() {
    let mut config = fast_config();
    config.cache.ttl_seconds = 3600;
    let clock = Arc::new(ManualClock::new());
    let backend = MockBackend::ok();
    let runtime = build_runtime(config, backend.clone(), clock.clone()).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;
    let request = analyze("fn main() {}");

    let first = runtime.access().handle(Some(&key), &request).await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(first.body, MockBackend::expected_body(&request));

    clock.advance(Duration::from_secs(3599));
    let hit = runtime.access().handle(Some(&key), &request).await.unwrap();
    assert_eq!(hit.cache_status, CacheStatus::Hit);
    assert_eq!(backend.calls(), 1);

    clock.advance(Duration::from_secs(2));
    let expired = runtime.access().handle(Some(&key), &request).await.unwrap();
    assert_eq!(expired.cache_status, CacheStatus::Miss);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_equivalent_content_shares_cache_entry() {
    let clock = Arc::new(ManualClock::new());
    let backend = MockBackend::ok();
    let runtime = build_runtime(fast_config(), backend.clone(), clock).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;

    runtime.access().handle(Some(&key), &analyze("fn main() {}\r\n")).await.unwrap();
    let second = runtime.access().handle(Some(&key), &analyze("  fn main() {}  ")).await.unwrap();

    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_rejected_credentials_never_reach_the_limiter() {
    let clock = Arc::new(ManualClock::new());
    let backend = MockBackend::ok();
    let runtime = build_runtime(fast_config(), backend.clone(), clock).await;

    for credential in [None, Some(""), Some("tg_not-a-real-key"), Some("garbage")] {
        let err = runtime.access().handle(credential, &analyze("x")).await.unwrap_err();
        assert_eq!(err, AccessError::InvalidCredential);
    }

    assert_eq!(runtime.limiter().bucket_count(), 0);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_forbidden_does_not_consume_tokens() {
    let mut config = fast_config();
    config.rate_limit.capacity = 1;
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(config, MockBackend::ok(), clock).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;

    let err = runtime
        .access()
        .handle(Some(&key), &AiRequest::new(Operation::Enhance, "x"))
        .await
        .unwrap_err();
    assert_eq!(err, AccessError::Forbidden { required_scope: "ai:enhance".to_string() });

    assert!(runtime.access().handle(Some(&key), &analyze("x")).await.is_ok());
}

#[tokio::test]
async fn test_rate_limit_is_shared_across_an_owners_keys() {
    let mut config = fast_config();
    config.rate_limit.capacity = 2;
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(config, MockBackend::ok(), clock).await;
    let first = issue_key(&runtime, "team-a", &["ai:*"]).await;
    let second = issue_key(&runtime, "team-a", &["ai:*"]).await;
    let other_owner = issue_key(&runtime, "team-b", &["ai:*"]).await;

    runtime.access().handle(Some(&first), &analyze("x")).await.unwrap();
    runtime.access().handle(Some(&second), &analyze("x")).await.unwrap();

    let denied = runtime.access().handle(Some(&first), &analyze("x")).await.unwrap_err();
    assert!(matches!(denied, AccessError::RateLimited { .. }));
    assert!(runtime.access().handle(Some(&other_owner), &analyze("x")).await.is_ok());
}

#[tokio::test]
async fn test_upstream_errors_are_not_cached() {
    let clock = Arc::new(ManualClock::new());
    let backend = MockBackend::failing(UpstreamError::Status {
        code: 500,
        message: "internal".to_string(),
    });
    let runtime = build_runtime(fast_config(), backend.clone(), clock).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;

    for attempt in 1..=2 {
        let err = runtime.access().handle(Some(&key), &analyze("x")).await.unwrap_err();
        assert!(matches!(err, AccessError::Upstream(UpstreamError::Status { code: 500, .. })));
        assert_eq!(backend.calls(), attempt);
    }
    assert!(runtime.cache().is_empty());
}

#[tokio::test]
async fn test_target_model_separates_cache_entries() {
    let clock = Arc::new(ManualClock::new());
    let backend = MockBackend::ok();
    let runtime = build_runtime(fast_config(), backend.clone(), clock).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;

    runtime.access().handle(Some(&key), &analyze("x").with_model("large")).await.unwrap();
    let other = runtime.access().handle(Some(&key), &analyze("x").with_model("small")).await.unwrap();

    assert_eq!(other.cache_status, CacheStatus::Miss);
    assert_eq!(backend.calls(), 2);
    assert_eq!(runtime.cache().len(), 2);
}
