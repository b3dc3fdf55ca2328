//! Publish seam towards the pub/sub collaborator
//!
//! Every publish is best effort: callers turn a failure into a
//! [`SettlementWarning`](crate::SettlementWarning) and keep going.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Routing key for order status updates
pub const ORDER_STATUS_CHANNEL: &str = "order/status";

/// Routing key for candles of one resolution
pub fn candles_channel(resolution: &str) -> String {
    format!("trade/candles:{}", resolution)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("publish to {topic} failed: {message}")]
pub struct PublishError {
    pub topic: String,
    pub message: String,
}

/// Message delivered once per routing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    /// JSON-encoded payload
    pub data: String,
}

impl Envelope {
    pub fn new(channel: &str, payload: &serde_json::Value) -> Result<Self, PublishError> {
        let data = serde_json::to_string(payload).map_err(|e| PublishError {
            topic: channel.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            channel: channel.to_string(),
            data,
        })
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        routing_keys: &[&str],
        payload: &serde_json::Value,
    ) -> Result<(), PublishError>;
}

/// Records envelopes in memory; can be switched to fail every publish
#[derive(Clone, Default)]
pub struct MemoryNotifier {
    published: Arc<Mutex<Vec<(String, Envelope)>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every `(topic, envelope)` published so far
    pub fn published(&self) -> Vec<(String, Envelope)> {
        self.published.lock().clone()
    }

    pub fn on_channel(&self, channel: &str) -> Vec<Envelope> {
        self.published
            .lock()
            .iter()
            .filter(|(_, e)| e.channel == channel)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn publish(
        &self,
        topic: &str,
        routing_keys: &[&str],
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError {
                topic: topic.to_string(),
                message: "notifier unavailable".to_string(),
            });
        }
        let envelopes = routing_keys
            .iter()
            .map(|key| Envelope::new(key, payload))
            .collect::<Result<Vec<_>, _>>()?;

        let mut published = self.published.lock();
        published.extend(envelopes.into_iter().map(|e| (topic.to_string(), e)));
        Ok(())
    }
}

/// Writes envelopes to the log instead of a broker
#[derive(Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn publish(
        &self,
        topic: &str,
        routing_keys: &[&str],
        payload: &serde_json::Value,
    ) -> Result<(), PublishError> {
        for key in routing_keys {
            let envelope = Envelope::new(key, payload)?;
            info!(topic, channel = %envelope.channel, bytes = envelope.data.len(), "Published");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_envelope_per_routing_key() {
        let notifier = MemoryNotifier::new();
        let payload = serde_json::json!({"id": 7, "status": "filled"});
        notifier
            .publish("exchange", &[ORDER_STATUS_CHANNEL, "order/audit"], &payload)
            .await
            .unwrap();

        let published = notifier.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, "exchange");
        let data: serde_json::Value = serde_json::from_str(&published[0].1.data).unwrap();
        assert_eq!(data, payload);
        assert_eq!(notifier.on_channel("order/audit").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_notifier() {
        let notifier = MemoryNotifier::new();
        notifier.set_failing(true);
        let err = notifier
            .publish("exchange", &[ORDER_STATUS_CHANNEL], &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.topic, "exchange");
        assert!(notifier.published().is_empty());
        assert_eq!(candles_channel("1h"), "trade/candles:1h");
    }
}
