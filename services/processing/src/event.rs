use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload schema version this service understands.
pub const SUPPORTED_EVENT_VERSION: u32 = 1;

/// "File uploaded" event received from the upload service.
///
/// The payload is the only channel carrying intake state into this service,
/// so the shape is checked (via `version`) instead of assumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadedEvent {
    #[serde(default = "default_event_version")]
    pub version: u32,
    pub file_id: Uuid,
    /// Local staging path written by the upload service
    pub staged_path: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
}

fn default_event_version() -> u32 {
    SUPPORTED_EVENT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_file_uploaded_event() {
        let json = r#"{
            "version": 1,
            "fileId": "550e8400-e29b-41d4-a716-446655440000",
            "stagedPath": "/var/lib/depot/staging/3f2c",
            "filename": "report.pdf",
            "contentType": "application/pdf",
            "size": 1024
        }"#;

        let event: FileUploadedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.file_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
        assert_eq!(event.staged_path, "/var/lib/depot/staging/3f2c");
        assert_eq!(event.content_type, "application/pdf");
        assert_eq!(event.size, 1024);
    }

    #[test]
    fn test_missing_version_defaults_to_supported() {
        let json = r#"{
            "fileId": "550e8400-e29b-41d4-a716-446655440000",
            "stagedPath": "/tmp/abc",
            "filename": "a.bin",
            "contentType": "application/octet-stream",
            "size": 1
        }"#;

        let event: FileUploadedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.version, SUPPORTED_EVENT_VERSION);
    }

    #[test]
    fn test_rejects_snake_case_payload() {
        let json = r#"{
            "file_id": "550e8400-e29b-41d4-a716-446655440000",
            "staged_path": "/tmp/abc",
            "filename": "a.bin",
            "content_type": "application/octet-stream",
            "size": 1
        }"#;

        assert!(serde_json::from_str::<FileUploadedEvent>(json).is_err());
    }
}
