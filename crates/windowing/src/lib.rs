//! Window finalization engine for Kafka / ksqlDB streams
//!
//! This crate buffers keyed events into tumbling windows of several sizes,
//! finalizes each window once its grace period has passed, publishes one
//! result per window to `{topic}_window_{n}_final`, and keeps the first
//! finalized result per window across competing processes. It also binds
//! window sizes to query handles and generates the streaming SQL for
//! windowed aggregations.

pub mod config;
pub mod core;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod query;
pub mod scheduler;
pub mod sink;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod window;

// Re-export commonly used types
pub use self::core::{
    system_clock, Clock, EventTimeExtractor, KeyExtractor, ManualClock, SharedClock, SystemClock,
};

pub use error::{
    QueryError, QueryResult, Result, SinkError, SinkResult, StateError, StateResult, WindowError,
    WindowResult, WindowingError,
};

pub use config::{
    EngineConfig, ObservabilityConfig, SchedulerConfig, StoreBackendKind, StoreConfig,
    WindowDefaults,
};

pub use window::{
    final_topic_name, window_key, window_start, FinalizationReport, OutputMode, TrackerStats,
    WindowBounds, WindowConfiguration, WindowFinalMessage, WindowStateTracker, WindowType,
};

pub use scheduler::{FinalizationScheduler, SweepReport};

pub use sink::{ChannelSink, FinalTopicSink, RoutedMessage};

pub use state::{MemoryStateBackend, SledConfig, SledStateBackend, StateBackend};

pub use store::{FinalizedWindowHandler, FinalizedWindowStore, HandleOutcome, RelayRetry};

pub use query::{
    Aggregation, EntitySet, GroupBy, StatementExecutor, UnsupportedPolicy, WindowAggregatedSet,
    WindowCollection, WindowFilteredSet, WindowedEntitySet,
};

#[cfg(feature = "kafka")]
pub use kafka::{FinalTopicSubscriber, KafkaFinalTopicSink, KafkaSinkConfig, KafkaSubscriberConfig};

pub use telemetry::init_tracing;
