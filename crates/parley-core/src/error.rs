use thiserror::Error;

/// Failure taxonomy of the messaging core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or missing required fields. Not retryable.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad or stale credential. The client must re-authenticate.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The actor may not perform this mutation on this message.
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A concurrent mutation holds the record. The caller may retry once.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        let busy = err
            .downcast_ref::<rusqlite::Error>()
            .and_then(|e| e.sqlite_error_code())
            .is_some_and(|code| {
                matches!(
                    code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            });

        if busy {
            CoreError::Conflict("record is being modified concurrently".into())
        } else {
            CoreError::Internal(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
