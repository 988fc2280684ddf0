//! Window configuration for a topic
//!
//! A [`WindowConfiguration`] describes how entities of one type published on
//! one topic are windowed: the set of window sizes, the grace period, the
//! retention of finalized states, the grouping key, the aggregation applied
//! at finalization and the sink results are published to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::WindowDefaults;
use crate::core::KeyExtractor;
use crate::error::{WindowError, WindowResult};
use crate::sink::FinalTopicSink;

use super::message::final_topic_name;

/// Default grace period after a window ends
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Default retention of finalized states, in hours
pub const DEFAULT_RETENTION_HOURS: u32 = 24;

/// Aggregation applied to the buffered events of a window at finalization
pub type AggregationFn<T> =
    Arc<dyn Fn(&[T]) -> anyhow::Result<serde_json::Value> + Send + Sync>;

/// Immutable configuration of one windowed topic
pub struct WindowConfiguration<T> {
    topic_name: String,
    windows: Vec<u32>,
    grace_period: Duration,
    grace: chrono::Duration,
    retention_hours: u32,
    pod_id: String,
    key_extractor: Arc<dyn KeyExtractor<T>>,
    aggregation: AggregationFn<T>,
    sink: Arc<dyn FinalTopicSink>,
}

impl<T> WindowConfiguration<T> {
    /// Start building a configuration for `topic_name`
    pub fn builder(
        topic_name: impl Into<String>,
        sink: Arc<dyn FinalTopicSink>,
    ) -> WindowConfigurationBuilder<T> {
        WindowConfigurationBuilder::new(topic_name.into(), sink)
    }

    /// Base topic the configuration applies to
    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    /// Window sizes in minutes, ascending and de-duplicated
    pub fn windows(&self) -> &[u32] {
        &self.windows
    }

    /// Grace period after the end of a window
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub(crate) fn grace(&self) -> chrono::Duration {
        self.grace
    }

    /// Retention of finalized states, in hours
    pub fn retention_hours(&self) -> u32 {
        self.retention_hours
    }

    pub(crate) fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.retention_hours))
    }

    /// Identity stamped on published messages
    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Topic finalized windows of `window_minutes` are published to
    pub fn final_topic_name(&self, window_minutes: u32) -> String {
        final_topic_name(&self.topic_name, window_minutes)
    }

    pub(crate) fn extract_key(&self, entity: &T) -> String {
        self.key_extractor.extract_key(entity)
    }

    pub(crate) fn aggregate(&self, events: &[T]) -> anyhow::Result<serde_json::Value> {
        (self.aggregation)(events)
    }

    pub(crate) fn sink(&self) -> &Arc<dyn FinalTopicSink> {
        &self.sink
    }
}

impl<T> fmt::Debug for WindowConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowConfiguration")
            .field("topic_name", &self.topic_name)
            .field("windows", &self.windows)
            .field("grace_period", &self.grace_period)
            .field("retention_hours", &self.retention_hours)
            .field("pod_id", &self.pod_id)
            .finish_non_exhaustive()
    }
}

/// Builder for [`WindowConfiguration`]
pub struct WindowConfigurationBuilder<T> {
    topic_name: String,
    windows: Vec<u32>,
    grace_period: Duration,
    retention_hours: u32,
    pod_id: Option<String>,
    key_extractor: Option<Arc<dyn KeyExtractor<T>>>,
    aggregation: Option<AggregationFn<T>>,
    sink: Arc<dyn FinalTopicSink>,
}

impl<T> WindowConfigurationBuilder<T> {
    fn new(topic_name: String, sink: Arc<dyn FinalTopicSink>) -> Self {
        Self {
            topic_name,
            windows: Vec::new(),
            grace_period: DEFAULT_GRACE_PERIOD,
            retention_hours: DEFAULT_RETENTION_HOURS,
            pod_id: None,
            key_extractor: None,
            aggregation: None,
            sink,
        }
    }

    /// Window sizes in minutes
    pub fn windows(mut self, windows: impl IntoIterator<Item = u32>) -> Self {
        self.windows = windows.into_iter().collect();
        self
    }

    /// Add a single window size
    pub fn window(mut self, minutes: u32) -> Self {
        self.windows.push(minutes);
        self
    }

    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn retention_hours(mut self, hours: u32) -> Self {
        self.retention_hours = hours;
        self
    }

    /// Take grace period and retention from engine defaults
    pub fn with_defaults(mut self, defaults: &WindowDefaults) -> Self {
        self.grace_period = defaults.grace_period();
        self.retention_hours = defaults.retention_hours;
        self
    }

    /// Override the pod identity (defaults to `HOSTNAME` or a random id)
    pub fn pod_id(mut self, pod_id: impl Into<String>) -> Self {
        self.pod_id = Some(pod_id.into());
        self
    }

    /// Grouping key of an entity; every entity falls in one group if unset
    pub fn key_extractor<K>(mut self, extractor: K) -> Self
    where
        K: KeyExtractor<T> + 'static,
    {
        self.key_extractor = Some(Arc::new(extractor));
        self
    }

    /// Aggregation applied at finalization; defaults to the event count
    pub fn aggregation<F>(mut self, aggregation: F) -> Self
    where
        F: Fn(&[T]) -> anyhow::Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.aggregation = Some(Arc::new(aggregation));
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> WindowResult<WindowConfiguration<T>>
    where
        T: 'static,
    {
        let mut windows = self.windows;
        if windows.is_empty() {
            return Err(WindowError::NoWindowSizes {
                topic: self.topic_name,
            });
        }
        if let Some(&size) = windows.iter().find(|&&size| size == 0) {
            return Err(WindowError::InvalidWindowSize { size });
        }
        windows.sort_unstable();
        windows.dedup();

        let grace = chrono::Duration::from_std(self.grace_period).map_err(|_| {
            WindowError::InvalidGracePeriod {
                millis: self.grace_period.as_millis(),
            }
        })?;

        let key_extractor = self
            .key_extractor
            .unwrap_or_else(|| Arc::new(|_: &T| "all".to_string()));
        let aggregation = self
            .aggregation
            .unwrap_or_else(|| {
                Arc::new(|events: &[T]| Ok::<_, anyhow::Error>(serde_json::json!(events.len())))
            });

        Ok(WindowConfiguration {
            topic_name: self.topic_name,
            windows,
            grace_period: self.grace_period,
            grace,
            retention_hours: self.retention_hours,
            pod_id: self.pod_id.unwrap_or_else(default_pod_id),
            key_extractor,
            aggregation,
            sink: self.sink,
        })
    }
}

/// Pod identity from the `HOSTNAME` environment variable, or a random id
pub fn default_pod_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    struct Trade {
        symbol: String,
        qty: u64,
    }

    fn sink() -> Arc<dyn FinalTopicSink> {
        let (sink, _rx) = ChannelSink::new(16);
        Arc::new(sink)
    }

    #[test]
    fn test_builder_defaults() {
        let config = WindowConfiguration::<Trade>::builder("trades", sink())
            .windows([5])
            .build()
            .unwrap();

        assert_eq!(config.grace_period(), Duration::from_secs(3));
        assert_eq!(config.retention_hours(), 24);
        assert!(!config.pod_id().is_empty());

        let trades = vec![
            Trade {
                symbol: "ABC".to_string(),
                qty: 1,
            },
            Trade {
                symbol: "XYZ".to_string(),
                qty: 2,
            },
        ];
        assert_eq!(config.aggregate(&trades).unwrap(), serde_json::json!(2));
        assert_eq!(config.extract_key(&trades[0]), "all");
    }

    #[test]
    fn test_windows_are_sorted_and_deduplicated() {
        let config = WindowConfiguration::<Trade>::builder("trades", sink())
            .windows([60, 5, 15, 5])
            .build()
            .unwrap();
        assert_eq!(config.windows(), &[5, 15, 60]);
    }

    #[test]
    fn test_empty_windows_rejected() {
        let err = WindowConfiguration::<Trade>::builder("trades", sink())
            .build()
            .unwrap_err();
        assert!(matches!(err, WindowError::NoWindowSizes { .. }));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = WindowConfiguration::<Trade>::builder("trades", sink())
            .windows([5, 0])
            .build()
            .unwrap_err();
        assert!(matches!(err, WindowError::InvalidWindowSize { size: 0 }));
    }

    #[test]
    fn test_engine_defaults_applied() {
        let defaults = WindowDefaults {
            grace_period_ms: 10_000,
            retention_hours: 6,
        };
        let config = WindowConfiguration::<Trade>::builder("trades", sink())
            .windows([5])
            .with_defaults(&defaults)
            .build()
            .unwrap();

        assert_eq!(config.grace_period(), Duration::from_secs(10));
        assert_eq!(config.retention_hours(), 6);
    }

    #[test]
    fn test_custom_extractor_and_aggregation() {
        let config = WindowConfiguration::<Trade>::builder("trades", sink())
            .window(1)
            .key_extractor(|t: &Trade| t.symbol.clone())
            .aggregation(|events: &[Trade]| {
                Ok(serde_json::json!({ "qty": events.iter().map(|t| t.qty).sum::<u64>() }))
            })
            .pod_id("pod-a")
            .build()
            .unwrap();

        let trades = vec![
            Trade {
                symbol: "ABC".to_string(),
                qty: 3,
            },
            Trade {
                symbol: "ABC".to_string(),
                qty: 4,
            },
        ];
        assert_eq!(config.extract_key(&trades[0]), "ABC");
        assert_eq!(config.aggregate(&trades).unwrap()["qty"], 7);
        assert_eq!(config.pod_id(), "pod-a");
        assert_eq!(config.final_topic_name(1), "trades_window_1_final");
    }
}
