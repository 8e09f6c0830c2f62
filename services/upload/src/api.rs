use crate::config::HttpConfig;
use crate::error::UploadError;
use crate::idempotency::IdempotencyGuard;
use crate::intake::{UploadMetadata, UploadService};
use crate::model::FileRecord;
use crate::store::FileStore;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub guard: Arc<IdempotencyGuard>,
    pub store: Arc<FileStore>,
    pub staging_dir: PathBuf,
}

/// Response returned for an accepted upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_id: Uuid,
    pub filename: String,
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<FileRecord> for UploadResponse {
    fn from(record: FileRecord) -> Self {
        Self {
            file_id: record.id,
            filename: record.filename,
            status: record.status,
            message: "file accepted for processing".to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// File record in API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub file_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub status: String,
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

impl From<FileRecord> for FileResponse {
    fn from(record: FileRecord) -> Self {
        Self {
            file_id: record.id,
            filename: record.filename,
            content_type: record.content_type,
            size: record.size,
            status: record.status,
            storage_path: record.storage_path,
            created_at: record.created_at,
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &HttpConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/files/upload", post(upload_file))
        .route("/api/v1/files/:file_id", get(get_file))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "depot-upload"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(state.store.pool()).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Accept a multipart upload, stage its bytes, and run the intake
/// transaction.
///
/// The duplicate check runs before any bytes touch disk, so a rejected
/// submission creates no side effects at all.
#[instrument(skip(state, headers, multipart))]
async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, UploadError> {
    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            UploadError::InvalidRequest("missing X-Idempotency-Key header".to_string())
        })?
        .to_string();

    if !state.guard.try_accept(&idempotency_key).await {
        return Err(UploadError::Duplicate);
    }

    let staged_path = state.staging_dir.join(Uuid::new_v4().to_string());
    let mut metadata: Option<UploadMetadata> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("unnamed").to_string();
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".to_string());

        info!(filename = %filename, staged_path = %staged_path.display(), "Staging upload");
        let size = stage_field(field, &staged_path).await?;

        metadata = Some(UploadMetadata {
            filename,
            content_type,
            size,
        });
        break;
    }

    let metadata = metadata.ok_or_else(|| {
        UploadError::InvalidRequest("missing \"file\" part in multipart body".to_string())
    })?;

    match state
        .uploads
        .intake(metadata, &idempotency_key, &staged_path)
        .await
    {
        Ok(record) => Ok((StatusCode::ACCEPTED, Json(UploadResponse::from(record)))),
        Err(e) => {
            // The record was rejected, so the staged bytes are orphaned.
            discard_staged(&staged_path).await;
            Err(e)
        }
    }
}

/// Get a file record by ID
async fn get_file(
    State(state): State<AppState>,
    UrlPath(file_id): UrlPath<Uuid>,
) -> Result<Json<FileResponse>, UploadError> {
    let record = state
        .store
        .find_by_id(file_id)
        .await
        .map_err(UploadError::Internal)?
        .ok_or(UploadError::NotFound)?;

    Ok(Json(FileResponse::from(record)))
}

/// Stream a multipart field to the staging directory; returns bytes written.
async fn stage_field(mut field: Field<'_>, path: &Path) -> Result<i64, UploadError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut size: i64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| UploadError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        size += chunk.len() as i64;
        file.write_all(&chunk).await?;
    }

    // The record will reference these bytes; they must survive a crash.
    file.sync_all().await?;
    Ok(size)
}

async fn discard_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Could not remove staged file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileStatus;

    fn record() -> FileRecord {
        FileRecord {
            id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            idempotency_key: "k1".to_string(),
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 1024,
            status: FileStatus::Pending.as_str().to_string(),
            storage_path: "/tmp/staging/abc".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_upload_response_shape() {
        let response = UploadResponse::from(record());
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"fileId\":\"550e8400-e29b-41d4-a716-446655440000\""));
        assert!(json.contains("\"status\":\"PENDING\""));
        assert!(json.contains("\"message\""));
    }

    #[test]
    fn test_file_response_carries_storage_path() {
        let response = FileResponse::from(record());
        assert_eq!(response.storage_path, "/tmp/staging/abc");
        assert_eq!(response.size, 1024);
    }
}
