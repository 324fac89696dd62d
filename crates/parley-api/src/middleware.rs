use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use parley_core::CoreError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate the bearer credential, including its token version, and attach
/// the resolved `Principal` to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        return Err(CoreError::Authentication("missing bearer credential".into()).into());
    };

    let principal = state
        .credentials
        .authenticate(&state.db, bearer.token())
        .await?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
