//! API key management handlers.

use super::{
    audit::{AuditEvent, KeyAction},
    AdminState,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tollgate_core::auth::{ApiKeySummary, AuthError, IssuedKey, RotateOptions};
use tracing::error;

/// Longest accepted key label.
const MAX_KEY_NAME_LENGTH: usize = 128;
const MAX_TTL_DAYS: u64 = 36_500;
const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug)]
pub enum AdminError {
    Validation(String),
    Auth(AuthError),
}

impl From<AuthError> for AdminError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Auth(err) => match err {
                AuthError::KeyNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                AuthError::KeyRevoked(_)
                | AuthError::KeyExpired(_)
                | AuthError::AlreadyRotated { .. } => (StatusCode::CONFLICT, err.to_string()),
                AuthError::InvalidOwner | AuthError::InvalidScope(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                AuthError::InvalidCredential => (StatusCode::UNAUTHORIZED, err.to_string()),
                internal => {
                    error!(error = %internal, "admin key operation failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
                }
            },
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    pub owner_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Lifetime in days. Omitted means the configured default.
    #[serde(default)]
    pub ttl_days: Option<u64>,
}

/// Optional body of `POST /admin/keys/{id}/rotate`. Omitted fields keep the predecessor's
/// name and apply the configured default TTL.
#[derive(Debug, Default, Deserialize)]
pub struct RotateKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub ttl_days: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ListKeysQuery {
    pub owner: Option<String>,
}

/// A newly created key. `api_key` is shown here once and never again.
#[derive(Debug, Serialize)]
pub struct IssuedKeyResponse {
    pub api_key: String,
    #[serde(flatten)]
    pub key: ApiKeySummary,
}

impl IssuedKeyResponse {
    fn new(issued: IssuedKey, state: &AdminState) -> Self {
        let key = issued.record.summary(state.clock.utc_now());
        Self { api_key: issued.raw_key, key }
    }
}

fn validate_issue_request(request: &IssueKeyRequest) -> Result<Option<Duration>, AdminError> {
    check_name(request.name.as_deref())?;
    ttl_from_days(request.ttl_days)
}

fn validate_rotate_request(body: &[u8]) -> Result<RotateOptions, AdminError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RotateOptions::default());
    }
    let request: RotateKeyRequest = serde_json::from_slice(body)
        .map_err(|e| AdminError::Validation(format!("Invalid rotate request: {e}")))?;
    check_name(request.name.as_deref())?;
    Ok(RotateOptions { ttl: ttl_from_days(request.ttl_days)?, name: request.name })
}

fn check_name(name: Option<&str>) -> Result<(), AdminError> {
    match name {
        Some(name) if name.chars().count() > MAX_KEY_NAME_LENGTH => Err(AdminError::Validation(
            format!("Key name too long. Maximum length is {MAX_KEY_NAME_LENGTH} characters."),
        )),
        _ => Ok(()),
    }
}

fn ttl_from_days(ttl_days: Option<u64>) -> Result<Option<Duration>, AdminError> {
    match ttl_days {
        Some(0) => Err(AdminError::Validation("ttl_days must be at least 1".to_string())),
        Some(days) if days > MAX_TTL_DAYS => {
            Err(AdminError::Validation(format!("ttl_days must be at most {MAX_TTL_DAYS}")))
        }
        Some(days) => Ok(Some(Duration::from_secs(days * SECONDS_PER_DAY))),
        None => Ok(None),
    }
}

/// `POST /admin/keys`
pub async fn issue_key(
    State(state): State<AdminState>,
    Json(request): Json<IssueKeyRequest>,
) -> Result<(StatusCode, Json<IssuedKeyResponse>), AdminError> {
    let ttl = validate_issue_request(&request)?;

    let issued = state
        .keys
        .issue_named(&request.owner_id, &request.scopes, ttl, request.name.clone())
        .await?;

    AuditEvent::new(KeyAction::Issue, &issued.record.id, &issued.record.owner_id).log();
    Ok((StatusCode::CREATED, Json(IssuedKeyResponse::new(issued, &state))))
}

/// `GET /admin/keys?owner=`
pub async fn list_keys(
    State(state): State<AdminState>,
    Query(query): Query<ListKeysQuery>,
) -> Result<Json<Vec<ApiKeySummary>>, AdminError> {
    let keys = match query.owner.as_deref() {
        Some(owner) => state.keys.list_for_owner(owner).await?,
        None => state.keys.list_all().await?,
    };
    Ok(Json(keys))
}

/// `GET /admin/keys/{id}`
pub async fn get_key(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<ApiKeySummary>, AdminError> {
    Ok(Json(state.keys.get(&id).await?))
}

/// `POST /admin/keys/{id}/revoke`. Revoking an already revoked key succeeds.
pub async fn revoke_key(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<ApiKeySummary>, AdminError> {
    let summary = state.keys.revoke(&id).await?;
    AuditEvent::new(KeyAction::Revoke, &summary.id, &summary.owner_id).log();
    Ok(Json(summary))
}

/// `POST /admin/keys/{id}/rotate` with an optional `{name, ttl_days}` body.
pub async fn rotate_key(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<IssuedKeyResponse>), AdminError> {
    let options = validate_rotate_request(&body)?;
    let issued = state.keys.rotate_with(&id, options).await?;
    AuditEvent::new(KeyAction::Rotate, &id, &issued.record.owner_id)
        .with_successor(&issued.record.id)
        .log();
    Ok((StatusCode::CREATED, Json(IssuedKeyResponse::new(issued, &state))))
}
