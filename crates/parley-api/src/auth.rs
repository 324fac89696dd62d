use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use rand_core::OsRng;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_core::credentials::Credentials;
use parley_core::{CoreError, MessageService};
use parley_db::Database;
use parley_gateway::Dispatcher;
use parley_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use parley_types::models::{Principal, Role};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub messages: MessageService,
    pub dispatcher: Dispatcher,
    pub credentials: Credentials,
}

impl AppStateInner {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, credentials: Credentials) -> AppState {
        Arc::new(Self {
            messages: MessageService::new(db.clone()),
            db,
            dispatcher,
            credentials,
        })
    }
}

/// Run a blocking DB call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(db.as_ref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            CoreError::Internal(anyhow::anyhow!("storage task failed: {}", e))
        })?
        .map_err(|e| CoreError::from(e).into())
}

fn hash_password(password: &str) -> Result<String, CoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn validate_registration(req: &RegisterRequest) -> Result<(), CoreError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(CoreError::Validation(
            "username must be 3 to 32 characters".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(CoreError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req)?;

    let username = req.username.clone();
    let taken = blocking(&state.db, move |db| {
        Ok(db.get_principal_by_username(&username)?.is_some())
    })
    .await?;
    if taken {
        return Err(CoreError::Conflict("username is taken".into()).into());
    }

    let password_hash = hash_password(&req.password)?;
    let id = Uuid::new_v4();
    let username = req.username.clone();
    blocking(&state.db, move |db| {
        db.create_principal(id, &username, &password_hash, Role::User)
    })
    .await?;

    let (principal, token) = state.credentials.rotate(&state.db, id).await?;
    info!("registered {} ({})", principal.username, principal.id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: principal.id,
            username: principal.username,
            role: principal.role,
            token,
        }),
    ))
}

/// Check the password, bump the token version, and push
/// `session_invalidated` to every connection opened under an older one.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let username = req.username.clone();
    let row = blocking(&state.db, move |db| db.get_principal_by_username(&username))
        .await?
        .ok_or_else(|| CoreError::Authentication("invalid username or password".into()))?;

    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| CoreError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;
    if Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .is_err()
    {
        warn!("failed login for {}", req.username);
        return Err(CoreError::Authentication("invalid username or password".into()).into());
    }

    let (principal, token) = state.credentials.rotate(&state.db, row.id).await?;
    let notified = state
        .dispatcher
        .invalidate_sessions(principal.id, principal.token_version)
        .await;
    info!(
        "{} logged in (version {}, {} stale connections notified)",
        principal.username, principal.token_version, notified
    );

    Ok(Json(AuthResponse {
        user_id: principal.id,
        username: principal.username,
        role: principal.role,
        token,
    }))
}

/// Retire the caller's credential. Every connection of the principal is
/// told its session ended.
pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<StatusCode, ApiError> {
    let (current, _) = state.credentials.rotate(&state.db, principal.id).await?;
    state
        .dispatcher
        .invalidate_sessions(current.id, current.token_version)
        .await;
    info!("{} logged out", current.username);
    Ok(StatusCode::NO_CONTENT)
}

/// Create the configured admin principal if no principal has that username yet.
pub async fn seed_admin(db: &Arc<Database>, username: &str, password: &str) -> anyhow::Result<()> {
    let name = username.to_string();
    let exists = blocking(db, move |db| Ok(db.get_principal_by_username(&name)?.is_some()))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.0))?;
    if exists {
        return Ok(());
    }

    let hash = hash_password(password)?;
    let id = Uuid::new_v4();
    let name = username.to_string();
    blocking(db, move |db| db.create_principal(id, &name, &hash, Role::Admin))
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.0))?;
    info!("seeded admin principal {}", username);
    Ok(())
}
