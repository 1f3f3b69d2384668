//! Transactional outbox relay: drains committed but unpublished outbox
//! entries into the event log with at-least-once delivery.

use crate::config::OutboxConfig;
use crate::database::Database;
use crate::errors::Result;
use crate::events::EventStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct OutboxRelay {
    db: Arc<Database>,
    events: Arc<EventStream>,
    batch_size: i64,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl OutboxRelay {
    pub fn new(
        db: Arc<Database>,
        events: Arc<EventStream>,
        config: &OutboxConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        OutboxRelay {
            db,
            events,
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            shutdown,
        }
    }

    /// Poll until shutdown. The shutdown signal is observed between
    /// batches, so an in-flight batch always completes.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "Outbox relay started (poll interval {:?}, batch size {})",
            self.poll_interval, self.batch_size
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.drain_batch().await {
                        Ok(0) => {}
                        Ok(published) => debug!("Outbox relay published {} entries", published),
                        Err(e) => error!("Outbox drain failed: {}", e),
                    }
                }
                changed = self.shutdown.changed() => {
                    // A dropped sender also stops the relay.
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Outbox relay stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Publish one batch in creation order and bulk-mark the successes.
    /// Entries that fail to publish stay unpublished and are retried on
    /// the next tick without blocking the rest of the batch.
    async fn drain_batch(&self) -> Result<usize> {
        let batch = self.db.fetch_unpublished_outbox(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut published = Vec::with_capacity(batch.len());
        for entry in &batch {
            match self.events.publish(&entry.event_type, &entry.payload).await {
                Ok(sequence) => {
                    debug!(
                        "Published outbox entry {} ({}) at log sequence {}",
                        entry.id, entry.event_type, sequence
                    );
                    published.push(entry.id);
                }
                Err(e) => {
                    warn!(
                        "Publish failed for outbox entry {} ({}): {}",
                        entry.id, entry.event_type, e
                    );
                }
            }
        }

        if !published.is_empty() {
            self.db.mark_outbox_published(&published).await?;
        }

        Ok(published.len())
    }
}
