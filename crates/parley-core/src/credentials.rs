use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use parley_db::Database;
use parley_types::api::Claims;
use parley_types::models::Principal;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Issues and checks credentials. A credential is only valid while its
/// embedded version equals the principal's stored token version, so every
/// login invalidates all earlier credentials for that principal.
#[derive(Clone)]
pub struct Credentials {
    secret: Arc<str>,
    ttl: Duration,
}

impl Credentials {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: Arc::from(secret),
            ttl,
        }
    }

    pub fn issue(&self, principal: &Principal, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            sub: principal.id,
            username: principal.username.clone(),
            role: principal.role,
            ver: principal.token_version,
            exp: (now + self.ttl).timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| CoreError::Internal(e.into()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|e| CoreError::Authentication(format!("invalid credential: {}", e)))
    }

    /// Decode `token` and check it against the stored principal.
    pub async fn authenticate(&self, db: &Arc<Database>, token: &str) -> Result<Principal> {
        let claims = self.decode(token)?;
        let row = {
            let db = db.clone();
            let id = claims.sub;
            tokio::task::spawn_blocking(move || db.get_principal_by_id(id))
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    CoreError::Internal(anyhow::anyhow!("storage task failed: {}", e))
                })??
        };

        let Some(row) = row else {
            warn!("credential for unknown principal {}", claims.sub);
            return Err(CoreError::Authentication("principal no longer exists".into()));
        };

        if row.token_version != claims.ver {
            warn!(
                "stale credential for {} (version {}, current {})",
                row.id, claims.ver, row.token_version
            );
            return Err(CoreError::Authentication(
                "credential has been superseded by a newer login".into(),
            ));
        }

        Ok(Principal {
            id: row.id,
            username: row.username,
            role: row.role,
            token_version: row.token_version,
        })
    }

    /// Bump the principal's token version and issue a credential for it.
    /// Every previously issued credential stops working.
    pub async fn rotate(&self, db: &Arc<Database>, principal_id: Uuid) -> Result<(Principal, String)> {
        let row = {
            let db = db.clone();
            tokio::task::spawn_blocking(move || db.bump_token_version(principal_id))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                CoreError::Internal(anyhow::anyhow!("storage task failed: {}", e))
            })??
        };

        let row = row.ok_or_else(|| CoreError::NotFound(format!("principal {}", principal_id)))?;
        let principal = Principal {
            id: row.id,
            username: row.username,
            role: row.role,
            token_version: row.token_version,
        };
        let token = self.issue(&principal, Utc::now())?;
        Ok((principal, token))
    }
}
