//! Window tracking and finalization
//!
//! This module provides:
//! - Window bounds, types and output modes
//! - Window alignment and key generation
//! - Per-topic window configuration
//! - Window state tracking and finalization
//! - The finalized window message

pub mod config;
pub mod key;
pub mod message;
pub mod state;
pub mod tracker;
pub mod types;

pub use config::{
    default_pod_id, AggregationFn, WindowConfiguration, WindowConfigurationBuilder,
    DEFAULT_GRACE_PERIOD, DEFAULT_RETENTION_HOURS,
};
pub use key::{empty_window_key, window_bounds, window_key, window_start, EMPTY_WINDOW_PREFIX};
pub use message::{final_topic_name, WindowFinalMessage};
pub use state::WindowState;
pub use tracker::{FinalizationReport, TrackerStats, WindowProcessor, WindowStateTracker};
pub use types::{OutputMode, WindowBounds, WindowType};
