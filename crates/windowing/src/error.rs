//! Error types for the windowing engine
//!
//! Each area of the engine (window tracking, state storage, query binding,
//! publishing) has its own error enum; [`WindowingError`] wraps them all.

use thiserror::Error;

/// Main engine error type
#[derive(Error, Debug)]
pub enum WindowingError {
    /// Window tracking errors
    #[error("window error: {0}")]
    Window(#[from] WindowError),

    /// State backend errors
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Query binding / statement generation errors
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Final-topic publishing errors
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration errors
    #[error("configuration error: {source}")]
    Configuration {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for unexpected conditions
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Window tracking and finalization errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// Window size is invalid
    #[error("invalid window size: {size}min, must be greater than 0")]
    InvalidWindowSize { size: u32 },

    /// Grace period cannot be represented
    #[error("invalid grace period: {millis}ms")]
    InvalidGracePeriod { millis: u128 },

    /// Configuration registered without any window sizes
    #[error("no window sizes configured for topic '{topic}'")]
    NoWindowSizes { topic: String },

    /// Aggregation function failed for a window
    #[error("aggregation failed for window '{window_key}': {reason}")]
    AggregationFailed { window_key: String, reason: String },

    /// A tracker was registered under the same key with a different entity type
    #[error("tracker '{key}' is registered for a different entity type")]
    TrackerTypeMismatch { key: String },

    /// Scheduler has been shut down
    #[error("finalization scheduler is shut down")]
    SchedulerStopped,
}

/// State backend operation errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State key not found
    #[error("state key not found: {key}")]
    KeyNotFound { key: String },

    /// State serialization failed
    #[error("state serialization failed for key '{key}': {reason}")]
    SerializationFailed { key: String, reason: String },

    /// State deserialization failed
    #[error("state deserialization failed for key '{key}': {reason}")]
    DeserializationFailed { key: String, reason: String },

    /// State backend storage error
    #[error("storage error in {backend_type}: {details}")]
    StorageError {
        backend_type: String,
        details: String,
    },

    /// Store has already been closed
    #[error("state store closed: {backend_type}")]
    Closed { backend_type: String },
}

/// Query binding and statement generation errors
#[derive(Error, Debug)]
pub enum QueryError {
    /// Requested window size is not part of the configured set
    #[error("window size {requested} is not configured. Available sizes: {available}")]
    UnsupportedWindowSize { requested: u32, available: String },

    /// Aggregation call has no streaming equivalent
    #[error("unsupported aggregation function: {function}")]
    UnsupportedAggregation { function: String },

    /// Window minutes must be positive
    #[error("window minutes must be positive, got {minutes}")]
    InvalidWindowMinutes { minutes: u32 },

    /// The external statement executor rejected a statement
    #[error("failed to execute statement for {table}: {reason}")]
    Execution { table: String, reason: String },

    /// The raw entity source failed
    #[error("entity source error on '{topic}': {reason}")]
    Source { topic: String, reason: String },
}

/// Publishing errors for finalized windows
#[derive(Error, Debug)]
pub enum SinkError {
    /// Message could not be delivered
    #[error("failed to send '{key}' to topic '{topic}': {reason}")]
    SendFailed {
        topic: String,
        key: String,
        reason: String,
    },

    /// Sink is closed and no longer accepts messages
    #[error("sink for topic '{topic}' is closed")]
    Closed { topic: String },

    /// Payload could not be encoded
    #[error("failed to encode payload for '{key}': {reason}")]
    Encoding { key: String, reason: String },
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, WindowingError>;

/// Result type alias for window operations
pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// Result type alias for state operations
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Result type alias for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl From<serde_json::Error> for WindowingError {
    fn from(err: serde_json::Error) -> Self {
        WindowingError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for WindowingError {
    fn from(err: anyhow::Error) -> Self {
        WindowingError::Unexpected(err.to_string())
    }
}

impl From<figment::Error> for WindowingError {
    fn from(err: figment::Error) -> Self {
        WindowingError::Configuration {
            source: Box::new(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_error_display() {
        let err = WindowError::InvalidWindowSize { size: 0 };
        assert!(err.to_string().contains("invalid window size"));
    }

    #[test]
    fn test_query_error_lists_available_sizes() {
        let err = QueryError::UnsupportedWindowSize {
            requested: 7,
            available: "1, 5, 60".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("7"));
        assert!(text.contains("1, 5, 60"));
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::KeyNotFound {
            key: "test_key".to_string(),
        };
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_windowing_error_from_sink_error() {
        let sink_err = SinkError::Closed {
            topic: "orders_window_5_final".to_string(),
        };
        let err: WindowingError = sink_err.into();
        assert!(matches!(err, WindowingError::Sink(_)));
    }
}
