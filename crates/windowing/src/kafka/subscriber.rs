//! Consumer of the final topics
//!
//! Reads finalized window messages published by any process and feeds them
//! into a [`FinalizedWindowStore`], which keeps the first message per window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Message;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WindowingError};
use crate::store::{FinalizedWindowStore, HandleOutcome};
use crate::window::{final_topic_name, WindowFinalMessage};

/// Default backoff after a consumer error
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// Configuration for the final-topic consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSubscriberConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Final topics to subscribe to
    pub topics: Vec<String>,
    /// Offset reset policy for new groups
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    /// Backoff after a consumer error (milliseconds)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    /// Additional Kafka consumer configuration
    #[serde(default)]
    pub extra_config: HashMap<String, String>,
}

fn default_offset_reset() -> String {
    "earliest".to_string()
}

fn default_retry_backoff() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

impl KafkaSubscriberConfig {
    /// Subscribe to `{base_topic}_window_{n}_final` for each size
    pub fn for_windows(
        brokers: impl Into<String>,
        group_id: impl Into<String>,
        base_topic: &str,
        windows: &[u32],
    ) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            topics: windows
                .iter()
                .map(|&n| final_topic_name(base_topic, n))
                .collect(),
            auto_offset_reset: default_offset_reset(),
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            extra_config: HashMap::new(),
        }
    }
}

/// Decode a final-topic record payload
pub fn decode_final_message(payload: Option<&[u8]>) -> Result<WindowFinalMessage> {
    let bytes = payload
        .ok_or_else(|| WindowingError::Serialization("empty final topic payload".to_string()))?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Streams final-topic records into a [`FinalizedWindowStore`]
pub struct FinalTopicSubscriber {
    consumer: Arc<StreamConsumer>,
    config: KafkaSubscriberConfig,
    store: Arc<FinalizedWindowStore>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FinalTopicSubscriber {
    pub fn new(config: KafkaSubscriberConfig, store: Arc<FinalizedWindowStore>) -> Result<Self> {
        if config.topics.is_empty() {
            return Err(WindowingError::Configuration {
                source: "at least one final topic is required".into(),
            });
        }

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false");

        for (key, value) in &config.extra_config {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer =
            client_config
                .create()
                .map_err(|e| WindowingError::Configuration {
                    source: Box::new(e),
                })?;

        Ok(Self {
            consumer: Arc::new(consumer),
            config,
            store,
            shutdown_tx: Mutex::new(None),
            task_handle: Mutex::new(None),
        })
    }

    /// Subscribe and start the consume loop
    pub async fn start(&self) -> Result<()> {
        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            warn!("Final topic subscriber already started");
            return Ok(());
        }

        let topics: Vec<&str> = self.config.topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&topics)
            .map_err(|e| WindowingError::Configuration {
                source: Box::new(e),
            })?;
        info!("Subscribed to final topics: {:?}", self.config.topics);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let consumer = Arc::clone(&self.consumer);
        let store = Arc::clone(&self.store);
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("Final topic subscriber stopping");
                        break;
                    }
                    result = consumer.recv() => {
                        match result {
                            Ok(msg) => {
                                match decode_final_message(msg.payload()) {
                                    Ok(message) => match store.handle(message).await {
                                        Ok(HandleOutcome::Accepted) => {}
                                        Ok(HandleOutcome::Duplicate) => {
                                            debug!(topic = msg.topic(), "Skipped duplicate final message");
                                        }
                                        Err(e) => {
                                            error!("Failed to store finalized window: {}", e);
                                            continue;
                                        }
                                    },
                                    Err(e) => {
                                        warn!(
                                            topic = msg.topic(),
                                            offset = msg.offset(),
                                            "Skipping undecodable final message: {}",
                                            e
                                        );
                                    }
                                }

                                if let Err(e) = consumer.commit_message(&msg, CommitMode::Async) {
                                    warn!("Failed to commit offset: {}", e);
                                }
                            }
                            Err(e) => {
                                error!("Error consuming final topic: {}", e);
                                tokio::time::sleep(backoff).await;
                            }
                        }
                    }
                }
            }
        });

        *handle_guard = Some(handle);
        Ok(())
    }

    /// Stop the consume loop
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Subscriber task panicked: {}", e);
            }
        }
        info!("Final topic subscriber stopped");
    }
}
