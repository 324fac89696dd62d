use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::debug;
use uuid::Uuid;

use parley_core::CoreError;
use parley_core::visibility::render;
use parley_types::api::{
    BulkDeleteRequest, BulkDeleteResponse, CreateMessageRequest, DeleteMessageRequest,
    DeleteResult, MarkReadRequest, MarkUnreadRequest, MessageEnvelope, ModifiedResponse,
    ToggleAction, ToggleMessageRequest,
};
use parley_types::models::{Message, Principal};

use crate::auth::AppState;
use crate::error::ApiError;

fn envelope(message: &Message, viewer: &Principal) -> Result<Json<MessageEnvelope>, ApiError> {
    let view = render(message, viewer.id, viewer.role)
        .ok_or_else(|| CoreError::NotFound(format!("message {}", message.id)))?;
    Ok(Json(MessageEnvelope {
        status: "success",
        message: view,
    }))
}

pub async fn create_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageEnvelope>), ApiError> {
    let outcome = state.messages.create(&principal, req).await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    debug!("{} created message {}", principal.id, outcome.value.id);
    Ok((StatusCode::CREATED, envelope(&outcome.value, &principal)?))
}

/// Pin, unpin, star or unstar one message.
pub async fn toggle_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ToggleMessageRequest>,
) -> Result<Json<MessageEnvelope>, ApiError> {
    let outcome = match (req.action, req.value) {
        (ToggleAction::Pin, true) => {
            let duration = req.duration.unwrap_or_default();
            state.messages.pin(&principal, message_id, duration).await?
        }
        (ToggleAction::Pin, false) => state.messages.unpin(&principal, message_id).await?,
        (ToggleAction::Star, value) => state.messages.star(&principal, message_id, value).await?,
    };
    state.dispatcher.dispatch_all(&outcome.events).await;
    envelope(&outcome.value, &principal)
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<DeleteMessageRequest>,
) -> Result<Json<DeleteResult>, ApiError> {
    let outcome = state
        .messages
        .delete_message(&principal, message_id, req.mode)
        .await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Ok(Json(outcome.value))
}

/// Never fails as a whole: ids that cannot be deleted come back in `skipped`.
pub async fn bulk_delete_messages(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<BulkDeleteRequest>,
) -> Json<BulkDeleteResponse> {
    let outcome = state
        .messages
        .bulk_delete(&principal, &req.message_ids, req.mode)
        .await;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Json(BulkDeleteResponse {
        status: "success",
        results: outcome.value.results,
        skipped: outcome.value.skipped,
    })
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<ModifiedResponse>, ApiError> {
    let outcome = state
        .messages
        .mark_read(&principal, req.user_id, req.sender_id)
        .await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Ok(Json(ModifiedResponse {
        status: "success",
        modified_count: outcome.value,
    }))
}

pub async fn mark_unread(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<MarkUnreadRequest>,
) -> Result<Json<ModifiedResponse>, ApiError> {
    let outcome = state
        .messages
        .mark_unread(&principal, req.user_id, req.target_user_id)
        .await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Ok(Json(ModifiedResponse {
        status: "success",
        modified_count: outcome.value,
    }))
}
