//! Audit trail for key mutations made through the admin API.
//!
//! Events go to the `audit` tracing target at INFO. They carry key ids and owner ids only;
//! raw keys never reach this module.

use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyAction {
    Issue,
    Revoke,
    Rotate,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub action: KeyAction,
    pub key_id: String,
    pub owner_id: String,
    /// Set for rotations: the key that replaced `key_id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successor_id: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: KeyAction, key_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            action,
            key_id: key_id.into(),
            owner_id: owner_id.into(),
            successor_id: None,
        }
    }

    #[must_use]
    pub fn with_successor(mut self, successor_id: impl Into<String>) -> Self {
        self.successor_id = Some(successor_id.into());
        self
    }

    pub fn log(self) {
        info!(
            target: "audit",
            timestamp = %self.timestamp,
            action = ?self.action,
            key_id = %self.key_id,
            owner_id = %self.owner_id,
            successor_id = ?self.successor_id,
            "admin_key_audit"
        );
    }
}
