//! Finalized window payload
//!
//! The same structure is published to the final topic and persisted by the
//! finalized window store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::types::WindowBounds;

/// Result of finalizing one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowFinalMessage {
    /// Key of the finalized window
    pub window_key: String,
    /// Window start (inclusive)
    pub window_start: DateTime<Utc>,
    /// Window end (exclusive)
    pub window_end: DateTime<Utc>,
    /// Window size in minutes
    pub window_minutes: u32,
    /// Number of events buffered when the window closed
    pub event_count: usize,
    /// Output of the configured aggregation function
    pub aggregated_data: serde_json::Value,
    /// When the window was finalized
    pub finalized_at: DateTime<Utc>,
    /// Identity of the finalizing process, for diagnostics only
    pub pod_id: String,
}

impl WindowFinalMessage {
    /// Bounds of the finalized window
    pub fn bounds(&self) -> WindowBounds {
        WindowBounds::new(self.window_start, self.window_end)
    }

    /// Whether retention allows this record to be evicted at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.window_end < now - retention
    }
}

/// Name of the topic finalized windows of `window_minutes` are published to
pub fn final_topic_name(base_topic: &str, window_minutes: u32) -> String {
    format!("{}_window_{}_final", base_topic, window_minutes)
}
