//! Engine configuration
//!
//! Configuration is loaded from an optional YAML file and overridden by
//! `WINDOWING_` prefixed environment variables, with `__` separating nested
//! keys (for example `WINDOWING_SCHEDULER__TICK_INTERVAL_MS=500`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StateResult, WindowingError};
use crate::sink::FinalTopicSink;
use crate::state::{MemoryStateBackend, SledConfig, SledStateBackend, StateBackend};
use crate::window::{WindowConfiguration, WindowConfigurationBuilder};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Finalization scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Finalized window store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Defaults applied to window configurations
    #[serde(default)]
    pub windows: WindowDefaults,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Identity published with finalized windows; hostname or a random id if unset
    #[serde(default)]
    pub pod_id: Option<String>,
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("WINDOWING_").split("__"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.store.validate()?;
        self.windows.validate()?;

        if matches!(&self.pod_id, Some(id) if id.trim().is_empty()) {
            return Err(WindowingError::Configuration {
                source: "pod_id must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Configured pod id, or the process default
    pub fn pod_id(&self) -> String {
        self.pod_id
            .clone()
            .unwrap_or_else(crate::window::default_pod_id)
    }

    /// Start a window configuration carrying the engine defaults and pod id
    pub fn window_configuration<T>(
        &self,
        topic_name: impl Into<String>,
        sink: Arc<dyn FinalTopicSink>,
    ) -> WindowConfigurationBuilder<T> {
        WindowConfiguration::builder(topic_name, sink)
            .with_defaults(&self.windows)
            .pod_id(self.pod_id())
    }
}

/// Finalization scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between finalization sweeps (milliseconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// How long a sweep waits for its trackers (milliseconds)
    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_ms: u64,

    /// Trackers finalized concurrently within one sweep
    #[serde(default = "default_max_concurrent_finalizations")]
    pub max_concurrent_finalizations: usize,
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_sweep_timeout() -> u64 {
    30_000
}

fn default_max_concurrent_finalizations() -> usize {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            sweep_timeout_ms: default_sweep_timeout(),
            max_concurrent_finalizations: default_max_concurrent_finalizations(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(WindowingError::Configuration {
                source: "scheduler.tick_interval_ms must be greater than 0".into(),
            });
        }

        if self.sweep_timeout_ms == 0 {
            return Err(WindowingError::Configuration {
                source: "scheduler.sweep_timeout_ms must be greater than 0".into(),
            });
        }

        if self.max_concurrent_finalizations == 0 {
            return Err(WindowingError::Configuration {
                source: "scheduler.max_concurrent_finalizations must be greater than 0".into(),
            });
        }

        Ok(())
    }

    /// Sweep interval; never zero
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_timeout_ms)
    }
}

/// Storage backend of the finalized window store
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    /// In-memory, lost on restart
    #[default]
    Memory,
    /// Embedded sled database
    Sled,
}

/// Finalized window store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// Database directory (sled only)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Cache capacity in bytes (sled only)
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    /// Flush after this many writes (sled only)
    #[serde(default = "default_flush_every")]
    pub flush_every: u64,

    /// Hours finalized records are kept before purging
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

fn default_flush_every() -> u64 {
    100
}

fn default_retention_hours() -> u32 {
    crate::window::DEFAULT_RETENTION_HOURS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::Memory,
            path: None,
            cache_capacity: default_cache_capacity(),
            flush_every: default_flush_every(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend == StoreBackendKind::Sled && self.path.is_none() {
            return Err(WindowingError::Configuration {
                source: "store.path is required for the sled backend".into(),
            });
        }

        if self.retention_hours == 0 {
            return Err(WindowingError::Configuration {
                source: "store.retention_hours must be greater than 0".into(),
            });
        }

        Ok(())
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.retention_hours))
    }

    /// Open the configured backend
    pub async fn open_backend(&self) -> StateResult<Arc<dyn StateBackend>> {
        match (self.backend, &self.path) {
            (StoreBackendKind::Sled, Some(path)) => {
                let config = SledConfig::new(path)
                    .with_cache_capacity(self.cache_capacity)
                    .with_flush_every(self.flush_every);
                Ok(Arc::new(SledStateBackend::open(config).await?))
            }
            _ => Ok(Arc::new(MemoryStateBackend::new())),
        }
    }
}

/// Defaults for window configurations built from this engine config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDefaults {
    /// Grace period after a window closes (milliseconds)
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Hours finalized window states are kept in memory
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

fn default_grace_period() -> u64 {
    crate::window::DEFAULT_GRACE_PERIOD.as_millis() as u64
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl WindowDefaults {
    pub fn validate(&self) -> Result<()> {
        if self.retention_hours == 0 {
            return Err(WindowingError::Configuration {
                source: "windows.retention_hours must be greater than 0".into(),
            });
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}
