use crate::event::FileUploadedEvent;
use crate::object_store::{object_key, BlobStore};
use crate::store::{FileStatus, RecordStore};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// What handling one event did to the file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// File uploaded and record moved to `COMPLETED`
    Completed,
    /// Upload failed and the record was (best-effort) moved to `FAILED`
    Failed,
    /// Record already terminal; nothing to do (redelivery)
    AlreadyProcessed,
    /// No record for this event; skipped
    UnknownRecord,
}

/// Applies a file-uploaded event: moves the staged bytes into the object
/// store and finalizes the record's status.
///
/// Safe under broker redelivery: the object key is derived from the file id
/// (re-upload is an overwrite) and status updates only apply to records
/// still `PENDING`.
pub struct FileProcessor<R, B> {
    records: Arc<R>,
    blobs: Arc<B>,
}

impl<R: RecordStore, B: BlobStore> FileProcessor<R, B> {
    pub fn new(records: Arc<R>, blobs: Arc<B>) -> Self {
        Self { records, blobs }
    }

    /// Handle one delivered event.
    ///
    /// Upload failures are absorbed here by marking the record `FAILED`;
    /// an `Err` is only returned when the record state could not be
    /// resolved at all, in which case the message should not be acked.
    #[instrument(skip(self, event), fields(file_id = %event.file_id))]
    pub async fn handle(&self, event: &FileUploadedEvent) -> Result<ProcessOutcome> {
        let Some(record) = self.records.get(event.file_id).await? else {
            warn!("No file record for event; skipping");
            metrics::counter!("processing.events.unknown_record").increment(1);
            return Ok(ProcessOutcome::UnknownRecord);
        };

        if record.status() != Some(FileStatus::Pending) {
            debug!(status = %record.status, "File already in terminal state; skipping");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let key = object_key(&event.file_id);
        let staged = Path::new(&event.staged_path);

        let location = match self.blobs.put_file(&key, staged, &event.content_type).await {
            Ok(location) => location,
            Err(e) => {
                error!(error = %e, "Object store upload failed; marking file failed");
                metrics::counter!("processing.files.failed").increment(1);
                self.mark_failed(event).await;
                return Ok(ProcessOutcome::Failed);
            }
        };

        match self.records.complete(event.file_id, &location).await {
            Ok(true) => {
                metrics::counter!("processing.files.completed").increment(1);
                info!(location = %location, "File processing completed");
                discard_staged(staged).await;
                Ok(ProcessOutcome::Completed)
            }
            Ok(false) => {
                // A racing redelivery finalized the record first; it owns
                // the staged-file cleanup.
                debug!("Record no longer pending after upload");
                Ok(ProcessOutcome::AlreadyProcessed)
            }
            Err(e) => {
                // The object is stored but the record still says PENDING.
                // Not acking lets redelivery retry the update; the re-upload
                // is an idempotent overwrite.
                error!(error = %e, "Uploaded file but failed to record completion");
                Err(e)
            }
        }
    }

    async fn mark_failed(&self, event: &FileUploadedEvent) {
        match self.records.fail(event.file_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(file_id = %event.file_id, "Record no longer pending; failure not recorded");
            }
            Err(e) => {
                warn!(
                    file_id = %event.file_id,
                    error = %e,
                    "Could not mark file failed; record left pending for reconciliation"
                );
            }
        }
    }
}

/// Remove the staged file once its bytes are in permanent storage.
/// Failure never affects the record state.
async fn discard_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Could not remove staged file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileRecord;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct InMemoryRecords {
        rows: Mutex<HashMap<Uuid, FileRecord>>,
        fail_updates: bool,
    }

    impl InMemoryRecords {
        fn with_pending(id: Uuid, staged_path: &str) -> Self {
            let record = FileRecord {
                id,
                status: FileStatus::Pending.as_str().to_string(),
                storage_path: staged_path.to_string(),
            };
            Self {
                rows: Mutex::new(HashMap::from([(id, record)])),
                fail_updates: false,
            }
        }

        fn empty() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
                fail_updates: false,
            }
        }

        fn record(&self, id: Uuid) -> FileRecord {
            self.rows.lock().unwrap().get(&id).unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RecordStore for InMemoryRecords {
        async fn get(&self, id: Uuid) -> Result<Option<FileRecord>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn complete(&self, id: Uuid, storage_path: &str) -> Result<bool> {
            if self.fail_updates {
                anyhow::bail!("status write refused");
            }
            let mut rows = self.rows.lock().unwrap();
            let record = rows.get_mut(&id).unwrap();
            if record.status != FileStatus::Pending.as_str() {
                return Ok(false);
            }
            record.status = FileStatus::Completed.as_str().to_string();
            record.storage_path = storage_path.to_string();
            Ok(true)
        }

        async fn fail(&self, id: Uuid) -> Result<bool> {
            if self.fail_updates {
                anyhow::bail!("status write refused");
            }
            let mut rows = self.rows.lock().unwrap();
            let record = rows.get_mut(&id).unwrap();
            if record.status != FileStatus::Pending.as_str() {
                return Ok(false);
            }
            record.status = FileStatus::Failed.as_str().to_string();
            Ok(true)
        }
    }

    struct StubBlobs {
        fail: bool,
        puts: Mutex<Vec<String>>,
    }

    impl StubBlobs {
        fn working() -> Self {
            Self {
                fail: false,
                puts: Mutex::new(Vec::new()),
            }
        }

        fn broken() -> Self {
            Self {
                fail: true,
                puts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl BlobStore for StubBlobs {
        async fn put_file(&self, key: &str, _path: &Path, _content_type: &str) -> Result<String> {
            if self.fail {
                anyhow::bail!("object store unreachable");
            }
            self.puts.lock().unwrap().push(key.to_string());
            Ok(format!("s3://test-bucket/{key}"))
        }
    }

    fn event(id: Uuid, staged_path: &str) -> FileUploadedEvent {
        FileUploadedEvent {
            version: 1,
            file_id: id,
            staged_path: staged_path.to_string(),
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 1024,
        }
    }

    fn staged_file() -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("depot-test-{}", Uuid::new_v4()));
        std::fs::write(&path, b"staged bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn test_successful_upload_completes_record_and_removes_staged_file() {
        let id = Uuid::new_v4();
        let staged = staged_file();
        let records = Arc::new(InMemoryRecords::with_pending(id, &staged.to_string_lossy()));
        let blobs = Arc::new(StubBlobs::working());
        let processor = FileProcessor::new(records.clone(), blobs.clone());

        let outcome = processor
            .handle(&event(id, &staged.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Completed);
        let record = records.record(id);
        assert_eq!(record.status, "COMPLETED");
        assert_eq!(record.storage_path, format!("s3://test-bucket/{id}"));
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_upload_failure_marks_record_failed_and_keeps_staged_file() {
        let id = Uuid::new_v4();
        let staged = staged_file();
        let records = Arc::new(InMemoryRecords::with_pending(id, &staged.to_string_lossy()));
        let processor = FileProcessor::new(records.clone(), Arc::new(StubBlobs::broken()));

        let outcome = processor
            .handle(&event(id, &staged.to_string_lossy()))
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Failed);
        assert_eq!(records.record(id).status, "FAILED");
        assert!(staged.exists());

        std::fs::remove_file(&staged).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_record_is_skipped_without_upload() {
        let records = Arc::new(InMemoryRecords::empty());
        let blobs = Arc::new(StubBlobs::working());
        let processor = FileProcessor::new(records, blobs.clone());

        let outcome = processor
            .handle(&event(Uuid::new_v4(), "/tmp/nowhere"))
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::UnknownRecord);
        assert!(blobs.puts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redelivery_after_completion_skips_upload() {
        let id = Uuid::new_v4();
        let records = Arc::new(InMemoryRecords::with_pending(id, "/tmp/gone"));
        let blobs = Arc::new(StubBlobs::working());
        let processor = FileProcessor::new(records.clone(), blobs.clone());

        records.complete(id, "s3://test-bucket/done").await.unwrap();

        let outcome = processor.handle(&event(id, "/tmp/gone")).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::AlreadyProcessed);
        assert!(blobs.puts.lock().unwrap().is_empty());
        assert_eq!(records.record(id).storage_path, "s3://test-bucket/done");
    }

    #[tokio::test]
    async fn test_failed_status_write_leaves_record_pending() {
        let id = Uuid::new_v4();
        let staged = staged_file();
        let mut records = InMemoryRecords::with_pending(id, &staged.to_string_lossy());
        records.fail_updates = true;
        let records = Arc::new(records);
        let processor = FileProcessor::new(records.clone(), Arc::new(StubBlobs::broken()));

        let outcome = processor
            .handle(&event(id, &staged.to_string_lossy()))
            .await
            .unwrap();

        // Upload failed and the failure mark also failed: the record stays
        // pending for manual reconciliation, but the event is still consumed.
        assert_eq!(outcome, ProcessOutcome::Failed);
        assert_eq!(records.record(id).status, "PENDING");

        std::fs::remove_file(&staged).unwrap();
    }
}
