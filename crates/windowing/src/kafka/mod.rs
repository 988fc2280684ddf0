//! Kafka integration for final topics
//!
//! - [`KafkaFinalTopicSink`]: publishes finalized windows to
//!   `{topic}_window_{n}_final`
//! - [`FinalTopicSubscriber`]: consumes those topics into a
//!   [`crate::store::FinalizedWindowStore`]

pub mod sink;
pub mod subscriber;

pub use sink::{KafkaFinalTopicSink, KafkaSinkConfig, KafkaSinkMetrics};
pub use subscriber::{decode_final_message, FinalTopicSubscriber, KafkaSubscriberConfig};
