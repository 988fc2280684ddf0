//! Entity set bound to one window size

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueryResult;
use crate::window::{OutputMode, WindowType};

use super::aggregated::WindowAggregatedSet;
use super::entity_set::EntitySet;
use super::expr::{Aggregation, GroupBy};
use super::ksql::{window_table_name, UnsupportedPolicy, WindowAggregationConfig};

/// A raw entity set viewed through one window size
///
/// Reads and writes go to the underlying set; aggregations produce
/// [`WindowAggregatedSet`] handles over the same source.
pub struct WindowedEntitySet<T> {
    base: Arc<dyn EntitySet<T>>,
    config: WindowAggregationConfig,
    policy: UnsupportedPolicy,
}

impl<T> WindowedEntitySet<T>
where
    T: Send + 'static,
{
    pub fn new(base: Arc<dyn EntitySet<T>>, window_minutes: u32) -> Self {
        Self {
            base,
            config: WindowAggregationConfig::new(window_minutes),
            policy: UnsupportedPolicy::default(),
        }
    }

    pub fn with_window_type(mut self, window_type: WindowType) -> Self {
        self.config.window_type = window_type;
        self
    }

    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.config.output_mode = output_mode;
        self
    }

    pub fn with_unsupported_policy(mut self, policy: UnsupportedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn window_minutes(&self) -> u32 {
        self.config.window_minutes
    }

    /// `{topic}_WINDOW_{n}MIN`
    pub fn window_table_name(&self) -> String {
        window_table_name(self.base.topic_name(), self.config.window_minutes)
    }

    /// Aggregate every row of a window into a single group
    pub fn aggregate(
        &self,
        aggregation: Aggregation,
        grace_period: Option<Duration>,
    ) -> QueryResult<WindowAggregatedSet<T>> {
        self.group_by_aggregate(GroupBy::all(), aggregation, grace_period)
    }

    /// Aggregate the rows of a window per group
    pub fn group_by_aggregate(
        &self,
        group_by: GroupBy,
        aggregation: Aggregation,
        grace_period: Option<Duration>,
    ) -> QueryResult<WindowAggregatedSet<T>> {
        let mut config = self.config.clone();
        if let Some(grace_period) = grace_period {
            config.grace_period = grace_period;
        }

        WindowAggregatedSet::new(
            Arc::clone(&self.base),
            group_by,
            aggregation,
            config,
            self.policy,
        )
    }
}

#[async_trait]
impl<T> EntitySet<T> for WindowedEntitySet<T>
where
    T: Send + 'static,
{
    fn topic_name(&self) -> &str {
        self.base.topic_name()
    }

    async fn add(&self, entity: T) -> QueryResult<()> {
        self.base.add(entity).await
    }

    async fn to_list(&self) -> QueryResult<Vec<T>> {
        self.base.to_list().await
    }

    async fn for_each(&self, action: &mut (dyn FnMut(T) + Send)) -> QueryResult<()> {
        self.base.for_each(action).await
    }
}

impl<T> fmt::Debug for WindowedEntitySet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedEntitySet")
            .field("topic", &self.base.topic_name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::entity_set::MemoryEntitySet;

    fn windowed(n: u32) -> WindowedEntitySet<u32> {
        let base: Arc<dyn EntitySet<u32>> =
            Arc::new(MemoryEntitySet::with_entities("orders", vec![1, 2, 3]));
        WindowedEntitySet::new(base, n)
    }

    #[tokio::test]
    async fn test_delegates_to_base() {
        let set = windowed(5);
        set.add(4).await.unwrap();

        assert_eq!(set.topic_name(), "orders");
        assert_eq!(set.to_list().await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(set.window_table_name(), "orders_WINDOW_5MIN");
    }

    #[test]
    fn test_aggregate_uses_single_group_and_default_grace() {
        let agg = windowed(5)
            .aggregate(Aggregation::new().count("Orders"), None)
            .unwrap();

        assert_eq!(agg.group_by(), &GroupBy::all());
        assert_eq!(agg.config().grace_period, Duration::from_secs(3));
        assert!(!agg.create_statement().contains("GROUP BY"));
    }

    #[test]
    fn test_group_by_aggregate_overrides_grace() {
        let agg = windowed(15)
            .with_output_mode(OutputMode::Final)
            .group_by_aggregate(
                GroupBy::column("customerId"),
                Aggregation::new().column("CustomerId", "customerId").sum("Total", "amount"),
                Some(Duration::from_secs(10)),
            )
            .unwrap();

        let statement = agg.create_statement();
        assert!(statement.contains("WINDOW TUMBLING (SIZE 15 MINUTES, GRACE PERIOD 10 SECONDS)"));
        assert!(statement.contains("GROUP BY CUSTOMERID"));
        assert!(statement.ends_with("EMIT FINAL"));
    }
}
