use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Event type written to the outbox for every accepted upload.
pub const FILE_UPLOADED_EVENT: &str = "FILE_UPLOADED";

/// Schema version stamped into every serialized event payload.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Processing state of a file record.
///
/// `Pending` is the only non-terminal state; a record moves out of it at
/// most once, to `Completed` or `Failed`.
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

/// Delivery state of an outbox entry.
///
/// `InFlight` marks a row claimed by a relay under a lease; rows whose lease
/// expires are claimed again, so a crashed relay never strands an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    New,
    InFlight,
    Processed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "NEW",
            OutboxStatus::InFlight => "IN_FLIGHT",
            OutboxStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(OutboxStatus::New),
            "IN_FLIGHT" => Some(OutboxStatus::InFlight),
            "PROCESSED" => Some(OutboxStatus::Processed),
            _ => None,
        }
    }
}

/// A row in the `files` table.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    /// Generated at intake, immutable primary key
    pub id: Uuid,
    /// Client-supplied token, unique per accepted upload
    pub idempotency_key: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    /// Stored as text; see [`FileStatus`]
    pub status: String,
    /// Staging location at creation; permanent location after completion
    pub storage_path: String,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn status(&self) -> Option<FileStatus> {
        FileStatus::parse(&self.status)
    }
}

/// A row in the `outbox` table.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    /// Serialized event body, opaque to the store
    pub payload: String,
    pub status: String,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The event body relayed to the broker.
///
/// This is the sole channel carrying state from the intake transaction to
/// the downstream processor, so the field set must round-trip losslessly.
/// Consumers check `version` before assuming the shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadedEvent {
    #[serde(default = "default_event_version")]
    pub version: u32,
    pub file_id: Uuid,
    pub staged_path: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
}

fn default_event_version() -> u32 {
    EVENT_SCHEMA_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_status_parse() {
        assert_eq!(FileStatus::parse("PENDING"), Some(FileStatus::Pending));
        assert_eq!(FileStatus::parse("COMPLETED"), Some(FileStatus::Completed));
        assert_eq!(FileStatus::parse("archived"), None);
    }

    #[test]
    fn test_event_payload_uses_camel_case_keys() {
        let event = FileUploadedEvent {
            version: EVENT_SCHEMA_VERSION,
            file_id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            staged_path: "/tmp/depot/staging/abc".to_string(),
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 1024,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"fileId\""));
        assert!(json.contains("\"stagedPath\""));
        assert!(json.contains("\"contentType\""));
        assert!(!json.contains("\"file_id\""));
    }
}
