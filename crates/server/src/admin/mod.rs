//! Admin API for key management.
//!
//! Mounted under `/admin/keys` on the main listener only when `auth.admin_token` is set; every
//! route requires that token in `X-Admin-Token`.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | `POST` | `/admin/keys` | issue, returns the raw key once |
//! | `GET` | `/admin/keys?owner=` | list, optionally for one owner |
//! | `GET` | `/admin/keys/{id}` | show |
//! | `POST` | `/admin/keys/{id}/revoke` | revoke (idempotent) |
//! | `POST` | `/admin/keys/{id}/rotate` | rotate, returns the successor's raw key once |

pub mod audit;
pub mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tollgate_core::{auth::ApiKeyManager, clock::SharedClock};

#[derive(Clone)]
pub struct AdminState {
    pub keys: Arc<ApiKeyManager>,
    pub clock: SharedClock,
}

/// Builds the admin router guarded by `admin_token`.
pub fn create_admin_router(state: AdminState, admin_token: Arc<String>) -> Router {
    Router::new()
        .route("/admin/keys", post(handlers::issue_key).get(handlers::list_keys))
        .route("/admin/keys/{id}", get(handlers::get_key))
        .route("/admin/keys/{id}/revoke", post(handlers::revoke_key))
        .route("/admin/keys/{id}/rotate", post(handlers::rotate_key))
        .layer(axum_middleware::from_fn_with_state(admin_token, middleware::admin_auth_middleware))
        .with_state(state)
}
