use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeleteMode, PinDuration, Role, Visibility};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket handshake.
/// `ver` must equal the principal's stored token version for the credential
/// to be accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: Role,
    pub ver: i64,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub sender_id: Option<Uuid>,
    #[serde(default)]
    pub receiver_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub attachment_ref: Option<String>,
}

/// A message as rendered for one viewer.
///
/// `content` is `None` when a placeholder replaces it; `placeholder` then says why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub content: Option<String>,
    pub attachment_ref: Option<String>,
    pub placeholder: Option<Placeholder>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub pinned_at: Option<DateTime<Utc>>,
    pub pin_expires_at: Option<DateTime<Utc>>,
    pub pinned_by: Option<Uuid>,
    pub is_starred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    DeletedBySender,
    RemovedByModerator,
}

#[derive(Debug, Serialize)]
pub struct MessageEnvelope {
    pub status: &'static str,
    pub message: MessageView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Pin,
    Star,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleMessageRequest {
    pub action: ToggleAction,
    pub value: bool,
    #[serde(default)]
    pub duration: Option<PinDuration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteMessageRequest {
    pub mode: DeleteMode,
}

/// Resulting deletion flags for one message, from the requester's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub message_id: Uuid,
    pub deleted_for_sender: bool,
    pub deleted_for_admin: bool,
    pub deleted_for_me: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BulkDeleteRequest {
    pub message_ids: Vec<String>,
    pub mode: DeleteMode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    pub status: &'static str,
    pub results: Vec<DeleteResult>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub user_id: Uuid,
    pub sender_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct MarkUnreadRequest {
    pub user_id: Uuid,
    pub target_user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedResponse {
    pub status: &'static str,
    pub modified_count: usize,
}
