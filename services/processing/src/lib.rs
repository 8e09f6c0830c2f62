//! Depot Processing Service
//!
//! Downstream half of the Depot file pipeline. Consumes "file uploaded"
//! events from Kafka, moves the staged bytes into permanent object storage,
//! and finalizes the file record's status in PostgreSQL.
//!
//! The broker delivers at-least-once, so every step tolerates redelivery:
//! the object key is derived from the file id (a repeat upload overwrites
//! the same object) and status updates only apply while the record is
//! still `PENDING`.
//!
//! ```text
//! Kafka topic                 S3 bucket                PostgreSQL
//! ┌──────────────┐           ┌──────────────┐         ┌──────────────┐
//! │ file events  │──────────▶│ {file_id}    │         │ files        │
//! └──────────────┘           └──────────────┘         └──────────────┘
//!        │                          │                        ▲
//!        ▼                          ▼                        │
//! ┌──────────────┐           record COMPLETED/FAILED ────────┘
//! │ FileProcessor│
//! └──────────────┘
//! ```

pub mod config;
pub mod consumer;
pub mod event;
pub mod object_store;
pub mod processor;
pub mod store;

pub use config::Config;
pub use consumer::ProcessingConsumer;
pub use event::{FileUploadedEvent, SUPPORTED_EVENT_VERSION};
pub use object_store::{BlobStore, ObjectStore};
pub use processor::{FileProcessor, ProcessOutcome};
pub use store::{FileRecord, FileStatus, MetadataStore, RecordStore};
