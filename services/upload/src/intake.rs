use crate::error::UploadError;
use crate::model::{
    FileRecord, FileStatus, FileUploadedEvent, EVENT_SCHEMA_VERSION, FILE_UPLOADED_EVENT,
};
use crate::store::FileStore;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Descriptive metadata for an accepted upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
}

/// The intake transaction: one atomic unit creating the file record and
/// its outbox entry.
pub struct UploadService {
    store: Arc<FileStore>,
}

impl UploadService {
    pub fn new(store: Arc<FileStore>) -> Self {
        Self { store }
    }

    /// Record an upload whose bytes are already durably staged.
    ///
    /// Only called after the idempotency guard allowed the request. The
    /// event payload is serialized before anything touches the database,
    /// so a serialization failure leaves no partial state; a duplicate
    /// idempotency key aborts the transaction and surfaces as a conflict.
    #[instrument(skip(self, metadata, staged_path), fields(idempotency_key = %idempotency_key))]
    pub async fn intake(
        &self,
        metadata: UploadMetadata,
        idempotency_key: &str,
        staged_path: &Path,
    ) -> Result<FileRecord, UploadError> {
        let record = new_record(&metadata, idempotency_key, staged_path);
        let event = build_event(&record);
        let payload = serde_json::to_string(&event)?;

        self.store
            .create_with_outbox(&record, FILE_UPLOADED_EVENT, &payload)
            .await?;

        metrics::counter!("upload.intake.accepted").increment(1);

        info!(
            file_id = %record.id,
            filename = %record.filename,
            size_bytes = record.size,
            "Upload accepted"
        );

        Ok(record)
    }
}

fn new_record(metadata: &UploadMetadata, idempotency_key: &str, staged_path: &Path) -> FileRecord {
    FileRecord {
        id: Uuid::new_v4(),
        idempotency_key: idempotency_key.to_string(),
        filename: metadata.filename.clone(),
        content_type: metadata.content_type.clone(),
        size: metadata.size,
        status: FileStatus::Pending.as_str().to_string(),
        storage_path: staged_path.display().to_string(),
        created_at: Utc::now(),
    }
}

fn build_event(record: &FileRecord) -> FileUploadedEvent {
    FileUploadedEvent {
        version: EVENT_SCHEMA_VERSION,
        file_id: record.id,
        staged_path: record.storage_path.clone(),
        filename: record.filename.clone(),
        content_type: record.content_type.clone(),
        size: record.size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 1024,
        }
    }

    #[test]
    fn test_new_record_starts_pending_at_staging_location() {
        let record = new_record(&metadata(), "k1", Path::new("/tmp/staging/abc"));

        assert_eq!(record.status(), Some(FileStatus::Pending));
        assert_eq!(record.storage_path, "/tmp/staging/abc");
        assert_eq!(record.idempotency_key, "k1");
        assert_eq!(record.size, 1024);
    }

    #[test]
    fn test_new_record_generates_distinct_ids() {
        let a = new_record(&metadata(), "k1", Path::new("/tmp/a"));
        let b = new_record(&metadata(), "k2", Path::new("/tmp/b"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_event_mirrors_record() {
        let record = new_record(&metadata(), "k1", Path::new("/tmp/staging/abc"));
        let event = build_event(&record);

        assert_eq!(event.file_id, record.id);
        assert_eq!(event.staged_path, record.storage_path);
        assert_eq!(event.filename, record.filename);
        assert_eq!(event.content_type, record.content_type);
        assert_eq!(event.size, record.size);
        assert_eq!(event.version, EVENT_SCHEMA_VERSION);
    }
}
