//! Publishing of finalized windows
//!
//! [`FinalTopicSink`] is the boundary the window tracker publishes through.
//! The Kafka implementation lives in `kafka::sink`; [`ChannelSink`] relays
//! messages to an in-process receiver, typically a finalized window store.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{SinkError, SinkResult};
use crate::window::WindowFinalMessage;

/// Destination for finalized window messages
#[async_trait]
pub trait FinalTopicSink: Send + Sync {
    /// Publish `message` to `topic` with record key `key`
    async fn send(&self, topic: &str, key: &str, message: &WindowFinalMessage) -> SinkResult<()>;

    /// Flush buffered messages
    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// A message delivered through a [`ChannelSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedMessage {
    /// Topic the message was addressed to
    pub topic: String,
    /// Record key (the window key)
    pub key: String,
    pub message: WindowFinalMessage,
}

/// Sink relaying messages over a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RoutedMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiving half of its channel
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RoutedMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl FinalTopicSink for ChannelSink {
    async fn send(&self, topic: &str, key: &str, message: &WindowFinalMessage) -> SinkResult<()> {
        trace!(topic = %topic, key = %key, "Relaying finalized window");

        self.tx
            .send(RoutedMessage {
                topic: topic.to_string(),
                key: key.to_string(),
                message: message.clone(),
            })
            .await
            .map_err(|_| SinkError::Closed {
                topic: topic.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message() -> WindowFinalMessage {
        WindowFinalMessage {
            window_key: "all_202403011000_5min".to_string(),
            window_start: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            window_end: Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap(),
            window_minutes: 5,
            event_count: 0,
            aggregated_data: serde_json::json!(0),
            finalized_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 3).unwrap(),
            pod_id: "pod-a".to_string(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_relays_messages() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.send("orders_window_5_final", "all_202403011000_5min", &message())
            .await
            .unwrap();

        let routed = rx.recv().await.unwrap();
        assert_eq!(routed.topic, "orders_window_5_final");
        assert_eq!(routed.key, "all_202403011000_5min");
        assert_eq!(routed.message, message());
    }

    #[tokio::test]
    async fn test_channel_sink_closed_receiver() {
        let (sink, rx) = ChannelSink::new(4);
        drop(rx);

        let err = sink
            .send("orders_window_5_final", "k", &message())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed { .. }));
    }
}
