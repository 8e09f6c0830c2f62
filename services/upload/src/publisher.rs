use crate::config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during event publication
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to create producer: {0}")]
    CreationError(String),

    #[error("Failed to deliver to topic {topic}: {message}")]
    DeliveryError { topic: String, message: String },
}

/// Broker acknowledgment of a delivered event
#[derive(Debug, Clone)]
pub struct PublishAck {
    /// Partition the event was delivered to
    pub partition: i32,
    /// Offset of the event in the partition
    pub offset: i64,
}

/// Publisher seam for the outbox relay.
///
/// An implementation must only return `Ok` once the broker has acknowledged
/// the write; the relay treats `Ok` as permission to mark the outbox row
/// processed.
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        key: &str,
        event_type: &str,
        payload: &[u8],
    ) -> Result<PublishAck, PublishError>;
}

/// Kafka-backed event publisher
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaPublisher {
    /// Create a new publisher with the given configuration
    pub fn new(config: &KafkaConfig) -> Result<Self, PublishError> {
        info!(
            brokers = %config.bootstrap_servers,
            topic = %config.topic,
            "Creating Kafka producer"
        );

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("request.timeout.ms", config.request_timeout_ms.to_string())
            .create()
            .map_err(|e| PublishError::CreationError(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }
}

#[async_trait::async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(
        &self,
        key: &str,
        event_type: &str,
        payload: &[u8],
    ) -> Result<PublishAck, PublishError> {
        let record = FutureRecord::to(&self.topic)
            .key(key)
            .payload(payload)
            .headers(OwnedHeaders::new().insert(Header {
                key: "event-type",
                value: Some(event_type),
            }));

        debug!(
            topic = %self.topic,
            key = %key,
            size_bytes = payload.len(),
            "Publishing event"
        );

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| PublishError::DeliveryError {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;

        Ok(PublishAck { partition, offset })
    }
}

impl Drop for KafkaPublisher {
    fn drop(&mut self) {
        info!("Shutting down Kafka producer");
        if let Err(e) = self.producer.flush(Timeout::After(Duration::from_secs(5))) {
            warn!("Failed to flush producer on shutdown: {}", e);
        }
    }
}
