use crate::config::KafkaConfig;
use crate::event::{FileUploadedEvent, SUPPORTED_EVENT_VERSION};
use crate::object_store::BlobStore;
use crate::processor::FileProcessor;
use crate::store::RecordStore;
use anyhow::{Context, Result};
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Kafka consumer driving the file processor.
///
/// Offsets are committed per handled message; a message whose record state
/// could not be resolved is left uncommitted and redelivered. Undecodable
/// payloads are logged and acked so one poison message never blocks the
/// subscription.
pub struct ProcessingConsumer<R, B> {
    consumer: StreamConsumer,
    processor: Arc<FileProcessor<R, B>>,
}

impl<R: RecordStore, B: BlobStore> ProcessingConsumer<R, B> {
    /// Create a new consumer subscribed to the file events topic
    pub fn new(config: &KafkaConfig, processor: Arc<FileProcessor<R, B>>) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval_ms.to_string(),
            )
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.topic])
            .context("Failed to subscribe to file events topic")?;

        info!(
            topic = %config.topic,
            group = %config.consumer_group,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            processor,
        })
    }

    /// Start consuming and processing messages
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting file event consumer");

        let mut message_stream = self.consumer.stream();

        while let Some(message_result) = message_stream.next().await {
            match message_result {
                Ok(message) => {
                    if let Err(e) = self.process_message(&message).await {
                        error!(
                            error = %e,
                            partition = message.partition(),
                            offset = message.offset(),
                            "Failed to process message"
                        );
                        // Left uncommitted; the broker redelivers it.
                        metrics::counter!("processing.messages.failed").increment(1);
                    } else {
                        if let Err(e) = self.consumer.commit_message(&message, CommitMode::Async) {
                            warn!(error = %e, "Failed to commit offset");
                        }
                        metrics::counter!("processing.messages.processed").increment(1);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Kafka consumer error");
                    metrics::counter!("processing.kafka.errors").increment(1);
                }
            }
        }

        Ok(())
    }

    /// Process a single Kafka message
    #[instrument(skip(self, message), fields(partition = message.partition(), offset = message.offset()))]
    async fn process_message(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let payload = message.payload().context("Message has no payload")?;

        let event: FileUploadedEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Undecodable event payload; skipping");
                metrics::counter!("processing.events.undecodable").increment(1);
                return Ok(());
            }
        };

        if event.version != SUPPORTED_EVENT_VERSION {
            warn!(
                version = event.version,
                "Unsupported event version; skipping"
            );
            metrics::counter!("processing.events.unsupported_version").increment(1);
            return Ok(());
        }

        debug!(
            file_id = %event.file_id,
            staged_path = %event.staged_path,
            "Received file uploaded event"
        );

        let outcome = self.processor.handle(&event).await?;
        debug!(?outcome, "Event handled");

        Ok(())
    }
}
