//! In-flight coalescing tests.
//!
//! A gated backend holds the first call open so concurrent identical requests pile up behind
//! it. Whatever the scheduling, only one backend call may happen per fingerprint while the
//! first is pending.

use crate::mock_infrastructure::{build_runtime, fast_config, issue_key, MockBackend};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tollgate_core::{
    backend::{AiRequest, Operation},
    cache::CacheStatus,
    clock::ManualClock,
};

const CALLERS: usize = 10;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_misses_make_one_backend_call() {
    let mut config = fast_config();
    config.rate_limit.capacity = 100;
    let backend = MockBackend::gated();
    let runtime =
        build_runtime(config, backend.clone(), Arc::new(ManualClock::new())).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;
    let request = AiRequest::new(Operation::Analyze, "fn shared() {}");

    let mut tasks = JoinSet::new();
    for _ in 0..CALLERS {
        let access = runtime.access().clone();
        let key = key.clone();
        let request = request.clone();
        tasks.spawn(async move { access.handle(Some(&key), &request).await });
    }

    backend.wait_for_calls(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.cache().inflight_count(), 1);
    backend.release();

    let mut statuses = Vec::new();
    while let Some(result) = tasks.join_next().await {
        let served = result.unwrap().unwrap();
        assert_eq!(served.body, MockBackend::expected_body(&request));
        statuses.push(served.cache_status);
    }

    assert_eq!(backend.calls(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == CacheStatus::Miss).count(), 1);
    assert!(statuses.iter().filter(|s| **s != CacheStatus::Miss).all(CacheStatus::is_hit));
    assert_eq!(runtime.cache().inflight_count(), 0);
    assert_eq!(runtime.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_distinct_requests_are_not_coalesced() {
    let backend = MockBackend::ok();
    let runtime =
        build_runtime(fast_config(), backend.clone(), Arc::new(ManualClock::new())).await;
    let key = issue_key(&runtime, "u1", &["ai:*"]).await;

    let mut tasks = JoinSet::new();
    for operation in Operation::ALL {
        let access = runtime.access().clone();
        let key = key.clone();
        tasks.spawn(async move {
            access.handle(Some(&key), &AiRequest::new(operation, "same content")).await
        });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap().cache_status, CacheStatus::Miss);
    }

    assert_eq!(backend.calls(), Operation::ALL.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_leader_does_not_strand_waiters() {
    let backend = MockBackend::gated();
    let runtime =
        build_runtime(fast_config(), backend.clone(), Arc::new(ManualClock::new())).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;
    let request = AiRequest::new(Operation::Analyze, "fn leader() {}");

    let leader = {
        let access = runtime.access().clone();
        let (key, request) = (key.clone(), request.clone());
        tokio::spawn(async move { access.handle(Some(&key), &request).await })
    };
    backend.wait_for_calls(1).await;

    let waiter = {
        let access = runtime.access().clone();
        let (key, request) = (key.clone(), request.clone());
        tokio::spawn(async move { access.handle(Some(&key), &request).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());
    backend.release();

    let served = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter should finish after the leader is cancelled")
        .unwrap()
        .unwrap();

    assert_eq!(served.cache_status, CacheStatus::Miss);
    assert_eq!(backend.calls(), 2);
    assert_eq!(runtime.cache().inflight_count(), 0);
}

#[tokio::test]
async fn test_dedupe_can_be_disabled() {
    let mut config = fast_config();
    config.cache.dedupe_inflight = false;
    let backend = MockBackend::ok();
    let runtime =
        build_runtime(config, backend.clone(), Arc::new(ManualClock::new())).await;
    let key = issue_key(&runtime, "u1", &["ai:analyze"]).await;
    let request = AiRequest::new(Operation::Analyze, "x");

    runtime.access().handle(Some(&key), &request).await.unwrap();
    let second = runtime.access().handle(Some(&key), &request).await.unwrap();

    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(backend.calls(), 1);
    assert_eq!(runtime.cache().inflight_count(), 0);
}
