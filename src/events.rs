//! Append-only event log client over NATS JetStream.

use crate::errors::{Result, WalletEngineError};
use async_nats::jetstream::{
    self,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context,
};
use tracing::info;

pub struct EventStream {
    context: Context,
    subject_prefix: String,
}

impl EventStream {
    /// Connect and ensure the configured stream exists.
    pub async fn connect(url: &str, stream_name: &str, subject_prefix: &str) -> Result<Self> {
        info!("Connecting to NATS JetStream at {}", url);

        let client = async_nats::connect(url)
            .await
            .map_err(|e| WalletEngineError::Nats(format!("NATS connect failed: {}", e)))?;

        let context = jetstream::new(client);

        let config = StreamConfig {
            name: stream_name.to_string(),
            description: Some("Wallet ledger event log".to_string()),
            subjects: vec![format!("{}.>", subject_prefix)],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            ..Default::default()
        };

        context
            .get_or_create_stream(config)
            .await
            .map_err(|e| WalletEngineError::Nats(format!("stream creation failed: {}", e)))?;

        info!("JetStream stream {} ready", stream_name);

        Ok(EventStream {
            context,
            subject_prefix: subject_prefix.to_string(),
        })
    }

    /// Append one event payload; returns the log-assigned sequence number.
    pub async fn publish(&self, event_type: &str, payload: &serde_json::Value) -> Result<u64> {
        let subject = format!("{}.{}", self.subject_prefix, event_type);
        let bytes = serde_json::to_vec(payload)?;

        let ack = self
            .context
            .publish(subject, bytes.into())
            .await
            .map_err(|e| WalletEngineError::Nats(format!("publish failed: {}", e)))?
            .await
            .map_err(|e| WalletEngineError::Nats(format!("publish ack failed: {}", e)))?;

        Ok(ack.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    #[ignore] // Requires NATS server
    async fn test_stream_roundtrip() {
        let events = EventStream::connect("nats://localhost:4222", "WALLET_EVENTS_TEST", "test.wallet.events")
            .await
            .expect("Failed to connect");

        let first = events
            .publish("funds.deposited", &json!({ "amount": "1.00" }))
            .await
            .expect("Failed to publish");
        let second = events
            .publish("funds.deposited", &json!({ "amount": "2.00" }))
            .await
            .expect("Failed to publish");

        assert!(second > first);
    }
}
