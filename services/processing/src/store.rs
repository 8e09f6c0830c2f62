use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Processing state of a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "PENDING",
            FileStatus::Completed => "COMPLETED",
            FileStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(FileStatus::Pending),
            "COMPLETED" => Some(FileStatus::Completed),
            "FAILED" => Some(FileStatus::Failed),
            _ => None,
        }
    }
}

/// This service's view of a file record: the processing state and where
/// the bytes live. The upload service owns the rest of the row.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: Uuid,
    pub status: String,
    pub storage_path: String,
}

impl FileRecord {
    pub fn status(&self) -> Option<FileStatus> {
        FileStatus::parse(&self.status)
    }
}

/// Store seam for the file processor.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>>;

    /// Move a pending record to `COMPLETED` with its permanent location.
    /// Returns `false` if the record was no longer pending.
    async fn complete(&self, id: Uuid, storage_path: &str) -> Result<bool>;

    /// Move a pending record to `FAILED`. Returns `false` if the record
    /// was no longer pending.
    async fn fail(&self, id: Uuid) -> Result<bool>;
}

/// File record access in PostgreSQL.
///
/// Status updates are conditional on the record still being `PENDING`, so
/// redelivered events can never overwrite a terminal state.
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RecordStore for MetadataStore {
    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, status, storage_path
            FROM files
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query file record")?;

        Ok(record)
    }

    async fn complete(&self, id: Uuid, storage_path: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'COMPLETED', storage_path = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(storage_path)
        .execute(&self.pool)
        .await
        .context("Failed to mark file completed")?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET status = 'FAILED'
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark file failed")?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_status_round_trip() {
        for status in [FileStatus::Pending, FileStatus::Completed, FileStatus::Failed] {
            assert_eq!(FileStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FileStatus::parse("QUEUED"), None);
    }
}
