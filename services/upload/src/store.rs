use crate::config::DatabaseConfig;
use crate::error::UploadError;
use crate::model::{FileRecord, OutboxEvent, OutboxStatus};
use crate::relay::OutboxStore;
use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// File and outbox persistence in PostgreSQL.
pub struct FileStore {
    pool: PgPool,
}

impl FileStore {
    /// Create a new store with a connection pool
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

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Insert a file record and its outbox entry in one transaction.
    ///
    /// Either both rows become visible or neither does. A unique violation
    /// on `idempotency_key` surfaces as [`UploadError::Duplicate`]; this is
    /// the backstop for the fail-open idempotency guard.
    #[instrument(skip(self, record, payload), fields(file_id = %record.id))]
    pub async fn create_with_outbox(
        &self,
        record: &FileRecord,
        event_type: &str,
        payload: &str,
    ) -> Result<(), UploadError> {
        let mut tx = self.pool.begin().await.map_err(map_unique_violation)?;

        sqlx::query(
            r#"
            INSERT INTO files (
                id, idempotency_key, filename, content_type,
                size, status, storage_path, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.idempotency_key)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.size)
        .bind(&record.status)
        .bind(&record.storage_path)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        sqlx::query(
            r#"
            INSERT INTO outbox (event_type, payload, status, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(event_type)
        .bind(payload)
        .bind(OutboxStatus::New.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_unique_violation)?;

        tx.commit().await.map_err(map_unique_violation)?;

        debug!(file_id = %record.id, "File record and outbox entry committed");
        Ok(())
    }

    /// Get a file record by ID
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, idempotency_key, filename, content_type,
                   size, status, storage_path, created_at
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

    /// Get a file record by its idempotency key
    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            r#"
            SELECT id, idempotency_key, filename, content_type,
                   size, status, storage_path, created_at
            FROM files
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query file record by idempotency key")?;

        Ok(record)
    }

    /// Get the connection pool (for health checks)
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_unique_violation(e: sqlx::Error) -> UploadError {
    if let sqlx::Error::Database(ref db) = e {
        if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) {
            return UploadError::Duplicate;
        }
    }
    UploadError::Database(e)
}

#[async_trait::async_trait]
impl OutboxStore for FileStore {
    /// Claim a batch of publishable rows.
    ///
    /// `NEW` rows and `IN_FLIGHT` rows whose lease expired move to
    /// `IN_FLIGHT` under `FOR UPDATE SKIP LOCKED`, so concurrent relay
    /// replicas never claim the same row inside a lease window.
    async fn claim_batch(&self, limit: i64, lease_secs: f64) -> Result<Vec<OutboxEvent>> {
        let events = sqlx::query_as::<_, OutboxEvent>(
            r#"
            UPDATE outbox
            SET status = 'IN_FLIGHT', claimed_at = NOW()
            WHERE id IN (
                SELECT id FROM outbox
                WHERE status = 'NEW'
                   OR (status = 'IN_FLIGHT'
                       AND claimed_at < NOW() - make_interval(secs => $2))
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, event_type, payload, status,
                      claimed_at, processed_at, created_at
            "#,
        )
        .bind(limit)
        .bind(lease_secs)
        .fetch_all(&self.pool)
        .await
        .context("Failed to claim outbox batch")?;

        Ok(events)
    }

    /// Mark a claimed row published; only called after broker acknowledgment.
    async fn mark_processed(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PROCESSED', processed_at = NOW()
            WHERE id = $1 AND status = 'IN_FLIGHT'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark outbox entry processed")?;

        Ok(())
    }

    /// Return a claimed row to the queue after a failed publish.
    async fn release(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'NEW', claimed_at = NULL
            WHERE id = $1 AND status = 'IN_FLIGHT'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to release outbox entry")?;

        Ok(())
    }
}
