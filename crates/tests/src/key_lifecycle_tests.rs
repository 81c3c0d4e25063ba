//! API key lifecycle integration tests.
//!
//! Cover the states a key moves through (active, revoked, rotated, expired, purged) as seen by
//! both the manager and the access pipeline, plus persistence across repository reopen.

use crate::mock_infrastructure::{build_runtime, fast_config, MockBackend};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tollgate_core::{
    auth::{ApiKeyManager, AuthError, KeyStatus, SqliteRepository},
    backend::{AiRequest, Operation},
    clock::{ManualClock, SystemClock},
    middleware::AccessError,
};

const DAY: Duration = Duration::from_secs(86_400);

#[tokio::test]
async fn test_issue_validate_revoke() {
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(fast_config(), MockBackend::ok(), clock).await;
    let keys = runtime.keys();

    let issued = keys.issue("u1", ["read"], Some(30 * DAY)).await.unwrap();
    assert!(!issued.record.secret_hash.contains(&issued.raw_key));

    let record = keys.validate(&issued.raw_key).await.unwrap();
    assert_eq!(record.scopes, BTreeSet::from(["read".to_string()]));
    assert_eq!(record.owner_id, "u1");

    let revoked = keys.revoke(&issued.record.id).await.unwrap();
    assert_eq!(revoked.status, KeyStatus::Revoked);
    assert_eq!(keys.validate(&issued.raw_key).await.unwrap_err(), AuthError::InvalidCredential);

    // Revoking again is a no-op.
    let again = keys.revoke(&issued.record.id).await.unwrap();
    assert_eq!(again.revoked_at, revoked.revoked_at);
}

#[tokio::test]
async fn test_revocation_applies_to_the_next_request() {
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(fast_config(), MockBackend::ok(), clock).await;
    let issued = runtime.keys().issue("u1", ["ai:analyze"], None).await.unwrap();
    let request = AiRequest::new(Operation::Analyze, "x");

    runtime.access().handle(Some(&issued.raw_key), &request).await.unwrap();
    runtime.keys().revoke(&issued.record.id).await.unwrap();

    let err = runtime.access().handle(Some(&issued.raw_key), &request).await.unwrap_err();
    assert_eq!(err, AccessError::InvalidCredential);
}

#[tokio::test]
async fn test_rotation_has_no_overlap_and_no_gap() {
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(fast_config(), MockBackend::ok(), clock).await;
    let keys = runtime.keys();
    let original = keys.issue_named("u1", ["ai:*"], None, Some("ci".to_string())).await.unwrap();
    keys.validate(&original.raw_key).await.unwrap();

    let successor = keys.rotate(&original.record.id).await.unwrap();

    assert_eq!(keys.validate(&original.raw_key).await.unwrap_err(), AuthError::InvalidCredential);
    let record = keys.validate(&successor.raw_key).await.unwrap();
    assert_eq!(record.scopes, original.record.scopes);
    assert_eq!(record.name.as_deref(), Some("ci"));
    assert_eq!(record.rotated_from_id.as_deref(), Some(original.record.id.as_str()));

    let linked = keys.successor_of(&original.record.id).await.unwrap().unwrap();
    assert_eq!(linked.id, successor.record.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_rotation_has_one_winner() {
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(fast_config(), MockBackend::ok(), clock).await;
    let original = runtime.keys().issue("u1", ["ai:*"], None).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let keys = runtime.keys().clone();
        let id = original.record.id.clone();
        tasks.spawn(async move { keys.rotate(&id).await });
    }

    let mut winners = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(issued) => winners.push(issued),
            Err(AuthError::AlreadyRotated { successor_id, .. }) => {
                assert!(!successor_id.is_empty());
            }
            Err(other) => panic!("unexpected rotation error: {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let active: Vec<_> = runtime
        .keys()
        .list_for_owner("u1")
        .await
        .unwrap()
        .into_iter()
        .filter(|k| k.status == KeyStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, winners[0].record.id);
}

#[tokio::test]
async fn test_expired_key_is_rejected_and_purged() {
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(fast_config(), MockBackend::ok(), clock.clone()).await;
    let keys = runtime.keys();
    let issued = keys.issue("u1", ["ai:analyze"], Some(DAY)).await.unwrap();
    let survivor = keys.issue("u1", ["ai:analyze"], None).await.unwrap();

    clock.advance(DAY + Duration::from_secs(1));

    assert_eq!(keys.validate(&issued.raw_key).await.unwrap_err(), AuthError::InvalidCredential);
    assert_eq!(keys.get(&issued.record.id).await.unwrap().status, KeyStatus::Expired);
    assert!(matches!(keys.rotate(&issued.record.id).await, Err(AuthError::KeyExpired(_))));

    assert_eq!(keys.purge_expired(Duration::ZERO).await.unwrap(), 1);
    assert!(matches!(keys.get(&issued.record.id).await, Err(AuthError::KeyNotFound(_))));
    keys.validate(&survivor.raw_key).await.unwrap();
}

#[tokio::test]
async fn test_invalid_issue_input_is_rejected() {
    let clock = Arc::new(ManualClock::new());
    let runtime = build_runtime(fast_config(), MockBackend::ok(), clock).await;
    let keys = runtime.keys();

    assert_eq!(keys.issue("", ["ai:analyze"], None).await.unwrap_err(), AuthError::InvalidOwner);
    assert!(matches!(
        keys.issue("u1", ["AI Analyze"], None).await,
        Err(AuthError::InvalidScope(_))
    ));
    assert!(matches!(
        keys.issue("u1", ["ai:analyze"], Some(Duration::ZERO)).await,
        Err(AuthError::ConfigError(_))
    ));
    assert!(keys.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keys_survive_repository_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("keys/tollgate.db").display());
    let config = fast_config();

    let raw_key = {
        let repo = SqliteRepository::new(&url).await.unwrap();
        let keys =
            ApiKeyManager::from_config(&config.auth, Arc::new(repo), SystemClock::shared()).unwrap();
        keys.issue("u1", ["ai:analyze"], None).await.unwrap().raw_key
    };

    let repo = SqliteRepository::new(&url).await.unwrap();
    let keys =
        ApiKeyManager::from_config(&config.auth, Arc::new(repo), SystemClock::shared()).unwrap();

    let record = keys.validate(&raw_key).await.unwrap();
    assert_eq!(record.owner_id, "u1");
    assert_eq!(keys.list_all().await.unwrap().len(), 1);
}
