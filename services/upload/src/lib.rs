//! Depot Upload Service
//!
//! Intake side of the Depot file pipeline. Accepts client uploads over
//! HTTP, stages the bytes on local disk, and records the file metadata
//! together with a "file uploaded" outbox entry in a single PostgreSQL
//! transaction. A periodic relay drains the outbox into Kafka, from where
//! the processing service moves the bytes into permanent object storage.
//!
//! ## Reliability model
//!
//! - **Idempotent intake**: a Redis reservation rejects duplicate
//!   submissions within a TTL window; when Redis is down the guard fails
//!   open and a unique constraint on the idempotency key catches the
//!   duplicate at commit time.
//! - **Transactional outbox**: the file record and its event are written
//!   atomically, so the relay's view of unpublished events is complete.
//! - **At-least-once relay**: outbox rows are claimed under a lease and
//!   only marked processed after broker acknowledgment; crashes redeliver,
//!   and the downstream consumer applies events idempotently.
//!
//! ```text
//! Client ──▶ HTTP API ──▶ staging disk
//!                │
//!                ▼
//!         files + outbox          Kafka
//!         (one transaction) ──▶  (relay, periodic)
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod intake;
pub mod model;
pub mod publisher;
pub mod relay;
pub mod store;

pub use config::Config;
pub use error::UploadError;
pub use idempotency::IdempotencyGuard;
pub use intake::{UploadMetadata, UploadService};
pub use model::{FileRecord, FileStatus, FileUploadedEvent, OutboxEvent, OutboxStatus};
pub use publisher::{EventPublisher, KafkaPublisher, PublishAck, PublishError};
pub use relay::{OutboxRelay, OutboxStore, RelayStats};
pub use store::FileStore;
