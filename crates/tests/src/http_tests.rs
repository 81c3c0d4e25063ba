//! End-to-end HTTP tests.
//!
//! The full server router over a runtime whose backend is the real [`HttpAiBackend`], pointed
//! at a mockito upstream. Requests are driven in-process with `tower::ServiceExt::oneshot`.

use crate::mock_infrastructure::{
    build_runtime, fast_config, upstream_mock::UPSTREAM_API_KEY, UpstreamMockBuilder,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use server::{create_app, HttpAiBackend};
use std::{sync::Arc, time::Duration};
use tollgate_core::{clock::ManualClock, config::AppConfig, runtime::TollgateRuntime};
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "integration-admin-token";

async fn gateway(upstream: &UpstreamMockBuilder) -> (TollgateRuntime, Router) {
    let mut config: AppConfig = fast_config();
    config.upstream.url = upstream.url();
    config.upstream.api_key = Some(UPSTREAM_API_KEY.to_string());
    config.auth.admin_token = Some(ADMIN_TOKEN.to_string());

    let backend = HttpAiBackend::new(
        config.upstream.url.clone(),
        config.upstream.api_key.clone(),
        "test-model",
        Duration::from_secs(5),
    )
    .unwrap();

    let runtime = build_runtime(config, Arc::new(backend), Arc::new(ManualClock::new())).await;
    let app = create_app(&runtime, None);
    (runtime, app)
}

fn ai_request(operation: &str, key: &str, content: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/v1/ai/{operation}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {key}"))
        .body(Body::from(json!({ "content": content }).to_string()))
        .unwrap()
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-token", ADMIN_TOKEN)
        .header(header::CONTENT_TYPE, "application/json");
    builder.body(body.map_or_else(Body::empty, |b| Body::from(b.to_string()))).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn issue_via_admin(app: &Router, scopes: &[&str]) -> Value {
    let response = app
        .clone()
        .oneshot(admin_request(
            "POST",
            "/admin/keys",
            Some(json!({ "owner_id": "team-a", "scopes": scopes, "name": "integration" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_upstream_called_once_for_repeated_request() {
    let mut upstream = UpstreamMockBuilder::new().await;
    let reply = json!({ "analysis": "looks fine" });
    upstream.mock_success("analyze", "fn main() {}", &reply, 1).await;
    let (_runtime, app) = gateway(&upstream).await;
    let key = issue_via_admin(&app, &["ai:analyze"]).await["api_key"].as_str().unwrap().to_string();

    for expected_cache in ["MISS", "HIT"] {
        let response = app.clone().oneshot(ai_request("analyze", &key, "fn main() {}")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], expected_cache);
        assert_eq!(body_json(response).await, reply);
    }

    upstream.assert_all().await;
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway_and_retried() {
    let mut upstream = UpstreamMockBuilder::new().await;
    upstream.mock_failure("enhance", 503, 2).await;
    let (runtime, app) = gateway(&upstream).await;
    let key = issue_via_admin(&app, &["ai:enhance"]).await["api_key"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let response = app.clone().oneshot(ai_request("enhance", &key, "x")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await, json!({ "error": "upstream request failed" }));
    }

    assert!(runtime.cache().is_empty());
    upstream.assert_all().await;
}

#[tokio::test]
async fn test_rotation_over_admin_api() {
    let mut upstream = UpstreamMockBuilder::new().await;
    upstream.mock_success("analyze", "x", &json!({ "ok": true }), 1).await;
    let (_runtime, app) = gateway(&upstream).await;

    let issued = issue_via_admin(&app, &["ai:analyze"]).await;
    let old_key = issued["api_key"].as_str().unwrap().to_string();
    let old_id = issued["id"].as_str().unwrap().to_string();
    assert!(old_key.starts_with(issued["key_prefix"].as_str().unwrap()));

    let rotated = app
        .clone()
        .oneshot(admin_request("POST", &format!("/admin/keys/{old_id}/rotate"), None))
        .await
        .unwrap();
    assert_eq!(rotated.status(), StatusCode::CREATED);
    let rotated = body_json(rotated).await;
    let new_key = rotated["api_key"].as_str().unwrap().to_string();
    assert_eq!(rotated["rotated_from_id"], old_id.as_str());

    let old = app.clone().oneshot(ai_request("analyze", &old_key, "x")).await.unwrap();
    assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
    let new = app.clone().oneshot(ai_request("analyze", &new_key, "x")).await.unwrap();
    assert_eq!(new.status(), StatusCode::OK);

    let again = app
        .clone()
        .oneshot(admin_request("POST", &format!("/admin/keys/{old_id}/rotate"), None))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let shown = app
        .oneshot(admin_request("GET", &format!("/admin/keys/{old_id}"), None))
        .await
        .unwrap();
    let shown = body_json(shown).await;
    assert_eq!(shown["status"], "revoked");
    assert!(shown.get("api_key").is_none());

    upstream.assert_all().await;
}

#[tokio::test]
async fn test_rotate_overrides_and_last_used_over_admin_api() {
    let mut upstream = UpstreamMockBuilder::new().await;
    upstream.mock_success("analyze", "x", &json!({ "ok": true }), 1).await;
    let (_runtime, app) = gateway(&upstream).await;

    let issued = issue_via_admin(&app, &["ai:analyze"]).await;
    let old_id = issued["id"].as_str().unwrap().to_string();
    assert!(issued["last_used_at"].is_null());

    let rotated = app
        .clone()
        .oneshot(admin_request(
            "POST",
            &format!("/admin/keys/{old_id}/rotate"),
            Some(json!({ "name": "renamed", "ttl_days": 1 })),
        ))
        .await
        .unwrap();
    assert_eq!(rotated.status(), StatusCode::CREATED);
    let rotated = body_json(rotated).await;
    assert_eq!(rotated["name"], "renamed");
    let created = rotated["created_at"].as_str().unwrap().parse::<chrono::DateTime<chrono::Utc>>();
    let expires = rotated["expires_at"].as_str().unwrap().parse::<chrono::DateTime<chrono::Utc>>();
    assert_eq!(expires.unwrap() - created.unwrap(), chrono::Duration::days(1));

    let new_key = rotated["api_key"].as_str().unwrap();
    let new_id = rotated["id"].as_str().unwrap();
    let served = app.clone().oneshot(ai_request("analyze", new_key, "x")).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);

    let shown = app
        .clone()
        .oneshot(admin_request("GET", &format!("/admin/keys/{new_id}"), None))
        .await
        .unwrap();
    assert!(body_json(shown).await["last_used_at"].is_string());

    let invalid = app
        .oneshot(admin_request(
            "POST",
            &format!("/admin/keys/{new_id}/rotate"),
            Some(json!({ "ttl_days": 0 })),
        ))
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    upstream.assert_all().await;
}

#[tokio::test]
async fn test_admin_api_rejects_wrong_token() {
    let upstream = UpstreamMockBuilder::new().await;
    let (_runtime, app) = gateway(&upstream).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/admin/keys")
                .header("x-admin-token", "not-the-admin-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_filters_by_owner() {
    let upstream = UpstreamMockBuilder::new().await;
    let (runtime, app) = gateway(&upstream).await;
    issue_via_admin(&app, &["ai:analyze"]).await;
    runtime.keys().issue("team-b", ["ai:enhance"], None).await.unwrap();

    let response =
        app.oneshot(admin_request("GET", "/admin/keys?owner=team-a", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listed = body_json(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["owner_id"], "team-a");
    assert_eq!(listed[0]["scopes"], json!(["ai:analyze"]));
}
