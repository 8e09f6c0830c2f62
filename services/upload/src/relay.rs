use crate::config::UploadConfig;
use crate::model::OutboxEvent;
use crate::publisher::EventPublisher;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Store seam for the outbox relay.
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` publishable rows, taking over rows whose
    /// previous claim is older than `lease_secs`.
    async fn claim_batch(&self, limit: i64, lease_secs: f64) -> Result<Vec<OutboxEvent>>;

    /// Record a broker-acknowledged publish.
    async fn mark_processed(&self, id: i64) -> Result<()>;

    /// Return a claimed row to the queue after a failed publish.
    async fn release(&self, id: i64) -> Result<()>;
}

/// Outcome of one relay cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
}

/// Periodic task that drains the outbox into the broker.
///
/// Publication is at-least-once: a crash between broker acknowledgment and
/// the processed-mark redelivers the event, which the downstream consumer
/// tolerates. Failures are contained per event; one undeliverable payload
/// never blocks the rest of the batch or the next cycle.
pub struct OutboxRelay<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    poll_interval: Duration,
    batch_size: i64,
    fan_out: usize,
    lease_secs: f64,
}

impl<S: OutboxStore, P: EventPublisher> OutboxRelay<S, P> {
    pub fn new(store: Arc<S>, publisher: Arc<P>, config: &UploadConfig) -> Self {
        Self {
            store,
            publisher,
            poll_interval: Duration::from_millis(config.outbox_poll_interval_ms),
            batch_size: config.outbox_batch_size,
            fan_out: config.relay_fan_out,
            lease_secs: config.claim_lease_secs as f64,
        }
    }

    /// Run cycles on the configured interval until the task is aborted.
    pub async fn run(&self) {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Starting outbox relay"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(stats) if stats.claimed > 0 => {
                    info!(
                        claimed = stats.claimed,
                        published = stats.published,
                        failed = stats.failed,
                        "Outbox relay cycle completed"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Outbox relay cycle failed");
                }
            }
        }
    }

    /// Execute a single relay cycle.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<RelayStats> {
        let events = self
            .store
            .claim_batch(self.batch_size, self.lease_secs)
            .await?;

        let claimed = events.len();
        if claimed == 0 {
            return Ok(RelayStats {
                claimed: 0,
                published: 0,
                failed: 0,
            });
        }

        let results: Vec<bool> = stream::iter(events)
            .map(|event| self.relay_one(event))
            .buffer_unordered(self.fan_out)
            .collect()
            .await;

        let published = results.iter().filter(|delivered| **delivered).count();
        let failed = claimed - published;

        metrics::counter!("outbox.relay.published").increment(published as u64);
        metrics::counter!("outbox.relay.failed").increment(failed as u64);

        Ok(RelayStats {
            claimed,
            published,
            failed,
        })
    }

    async fn relay_one(&self, event: OutboxEvent) -> bool {
        match self
            .publisher
            .publish(
                &event.id.to_string(),
                &event.event_type,
                event.payload.as_bytes(),
            )
            .await
        {
            Ok(ack) => {
                debug!(
                    outbox_id = event.id,
                    partition = ack.partition,
                    offset = ack.offset,
                    "Event published"
                );
                if let Err(e) = self.store.mark_processed(event.id).await {
                    // The broker already has the event; the expiring lease
                    // redrives it and the consumer dedupes the redelivery.
                    warn!(
                        outbox_id = event.id,
                        error = %e,
                        "Published event left claimed; will be redelivered"
                    );
                }
                true
            }
            Err(e) => {
                warn!(
                    outbox_id = event.id,
                    error = %e,
                    "Publish failed; returning event to queue"
                );
                if let Err(release_err) = self.store.release(event.id).await {
                    warn!(
                        outbox_id = event.id,
                        error = %release_err,
                        "Failed to release event; lease expiry will recover it"
                    );
                }
                false
            }
        }
    }
}
