use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_types::api::MessageView;
use parley_types::models::Principal;

use crate::auth::AppState;
use crate::error::ApiError;

/// The caller's conversation with `peer_id`. Expired pins are swept first and
/// their unpin events fanned out before the response is returned.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let outcome = state.messages.conversation(&principal, peer_id).await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Ok(Json(outcome.value))
}

pub async fn get_pins(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let outcome = state.messages.active_pins(&principal, peer_id).await?;
    state.dispatcher.dispatch_all(&outcome.events).await;
    Ok(Json(outcome.value))
}

pub async fn get_assistant_thread(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    Ok(Json(state.messages.assistant_thread(&principal).await?))
}

pub async fn get_starred(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    Ok(Json(state.messages.starred(&principal).await?))
}

/// Admin only.
pub async fn get_moderation_view(
    State(state): State<AppState>,
    Path((a, b)): Path<(Uuid, Uuid)>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    Ok(Json(state.messages.moderation_view(&principal, a, b).await?))
}
