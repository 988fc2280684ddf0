//! Kafka publisher for finalized windows
//!
//! Publishes [`WindowFinalMessage`] records as JSON to the per-size final
//! topics, keyed by window key. Retriable broker errors are retried with
//! exponential backoff.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SinkError, SinkResult, WindowingError};
use crate::sink::FinalTopicSink;
use crate::window::WindowFinalMessage;

/// Default timeout for sending messages
const DEFAULT_SEND_TIMEOUT_MS: u64 = 30000;

/// Default number of retries for failed sends
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default base delay for exponential backoff (milliseconds)
const DEFAULT_BASE_BACKOFF_MS: u64 = 100;

const MAX_BACKOFF_MS: u64 = 60_000;

/// Configuration for the final-topic producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSinkConfig {
    /// Kafka bootstrap servers
    pub brokers: String,

    /// Client ID for this producer
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Timeout for sending messages (milliseconds)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Enable idempotent producer
    #[serde(default = "default_true")]
    pub enable_idempotence: bool,

    /// Compression type (none, gzip, snappy, lz4, zstd)
    #[serde(default = "default_compression")]
    pub compression_type: String,

    /// Acknowledgment level (0, 1, all)
    #[serde(default = "default_acks")]
    pub acks: String,

    /// Maximum retries for failed sends
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Linger time for batching (milliseconds)
    #[serde(default)]
    pub linger_ms: u64,
}

fn default_client_id() -> String {
    "windowing-finalizer".to_string()
}
fn default_send_timeout() -> u64 {
    DEFAULT_SEND_TIMEOUT_MS
}
fn default_true() -> bool {
    true
}
fn default_compression() -> String {
    "snappy".to_string()
}
fn default_acks() -> String {
    "all".to_string()
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_base_backoff() -> u64 {
    DEFAULT_BASE_BACKOFF_MS
}

impl Default for KafkaSinkConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: default_client_id(),
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            enable_idempotence: true,
            compression_type: default_compression(),
            acks: default_acks(),
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            linger_ms: 5,
        }
    }
}

/// Producer-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KafkaSinkMetrics {
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub retries: u64,
}

/// [`FinalTopicSink`] backed by an rdkafka `FutureProducer`
pub struct KafkaFinalTopicSink {
    producer: FutureProducer,
    config: KafkaSinkConfig,
    messages_sent: AtomicU64,
    messages_failed: AtomicU64,
    retries: AtomicU64,
    closed: AtomicBool,
}

impl KafkaFinalTopicSink {
    pub fn new(config: KafkaSinkConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("compression.type", &config.compression_type)
            .set("acks", &config.acks)
            .set("linger.ms", config.linger_ms.to_string())
            .set("message.timeout.ms", config.send_timeout_ms.to_string());

        if config.enable_idempotence {
            client_config.set("enable.idempotence", "true");
        }

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e| WindowingError::Configuration {
                    source: Box::new(e),
                })?;

        info!(brokers = %config.brokers, "Created final topic producer");

        Ok(Self {
            producer,
            config,
            messages_sent: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn metrics(&self) -> KafkaSinkMetrics {
        KafkaSinkMetrics {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Flush outstanding messages and stop accepting new ones
    pub async fn close(&self) -> SinkResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_producer()?;
        info!("Final topic producer closed");
        Ok(())
    }

    fn flush_producer(&self) -> SinkResult<()> {
        self.producer
            .flush(Timeout::After(Duration::from_millis(
                self.config.send_timeout_ms,
            )))
            .map_err(|e| SinkError::SendFailed {
                topic: "*".to_string(),
                key: "*".to_string(),
                reason: format!("flush failed: {}", e),
            })
    }

    async fn send_with_retry(&self, topic: &str, key: &str, payload: &[u8]) -> SinkResult<()> {
        let mut retries = 0;
        let max_retries = self.config.max_retries;

        loop {
            let headers = OwnedHeaders::new().insert(Header {
                key: "content-type",
                value: Some("application/json".as_bytes()),
            });
            let record = FutureRecord::to(topic)
                .key(key)
                .payload(payload)
                .headers(headers);

            let result = self
                .producer
                .send(
                    record,
                    Timeout::After(Duration::from_millis(self.config.send_timeout_ms)),
                )
                .await;

            match result {
                Ok(_) => {
                    if retries > 0 {
                        debug!("Message sent successfully after {} retries", retries);
                    }
                    return Ok(());
                }
                Err((err, _)) => {
                    if !should_retry(&err, retries, max_retries) {
                        error!(
                            topic = %topic,
                            key = %key,
                            "Failed to send message after {} retries: {}",
                            retries,
                            err
                        );
                        return Err(SinkError::SendFailed {
                            topic: topic.to_string(),
                            key: key.to_string(),
                            reason: err.to_string(),
                        });
                    }

                    retries += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);

                    let backoff = backoff_delay(self.config.base_backoff_ms, retries);
                    warn!(
                        "Send failed (attempt {}/{}), retrying in {:?}: {}",
                        retries,
                        max_retries + 1,
                        backoff,
                        err
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl FinalTopicSink for KafkaFinalTopicSink {
    async fn send(&self, topic: &str, key: &str, message: &WindowFinalMessage) -> SinkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed {
                topic: topic.to_string(),
            });
        }

        let payload = serde_json::to_vec(message).map_err(|e| SinkError::Encoding {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match self.send_with_retry(topic, key, &payload).await {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.messages_failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn flush(&self) -> SinkResult<()> {
        self.flush_producer()
    }
}

fn should_retry(error: &KafkaError, retries: u32, max_retries: u32) -> bool {
    if retries >= max_retries {
        return false;
    }

    matches!(
        error,
        KafkaError::MessageProduction(
            RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NotLeaderForPartition
        )
    )
}

fn backoff_delay(base_ms: u64, retry_count: u32) -> Duration {
    let backoff_ms = base_ms.saturating_mul(2u64.pow(retry_count.min(10)));
    Duration::from_millis(backoff_ms.min(MAX_BACKOFF_MS))
}
