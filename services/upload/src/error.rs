use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors surfaced by the intake path
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("duplicate request: idempotency key already used")]
    Duplicate,

    #[error("file record not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to serialize event payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage failure: {0}")]
    Database(#[from] sqlx::Error),

    #[error("staging i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl UploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::Duplicate => StatusCode::CONFLICT,
            UploadError::NotFound => StatusCode::NOT_FOUND,
            UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            // Nothing was committed; the client may retry.
            UploadError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            UploadError::Serialization(_) | UploadError::Io(_) | UploadError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_maps_to_conflict() {
        assert_eq!(UploadError::Duplicate.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transient_storage_failure_is_retryable() {
        let err = UploadError::Database(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
