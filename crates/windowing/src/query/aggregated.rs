//! Handle on a windowed aggregation table
//!
//! Holds the generated CREATE TABLE AS SELECT statement for one grouping and
//! projection over a windowed source, and reads the materialized rows back
//! through a [`StatementExecutor`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::{QueryError, QueryResult};

use super::entity_set::{EntitySet, StatementExecutor};
use super::expr::{Aggregation, GroupBy};
use super::ksql::{
    aggregated_table_name, create_table_as_select, pull_query, UnsupportedPolicy,
    WindowAggregationConfig,
};

/// A windowed aggregation bound to its source set
pub struct WindowAggregatedSet<T> {
    base: Arc<dyn EntitySet<T>>,
    group_by: GroupBy,
    aggregation: Aggregation,
    config: WindowAggregationConfig,
    table_name: String,
    create_statement: String,
}

impl<T> WindowAggregatedSet<T>
where
    T: Send + 'static,
{
    /// Bind an aggregation and generate its statement
    pub fn new(
        base: Arc<dyn EntitySet<T>>,
        group_by: GroupBy,
        aggregation: Aggregation,
        config: WindowAggregationConfig,
        policy: UnsupportedPolicy,
    ) -> QueryResult<Self> {
        let topic = base.topic_name().to_string();
        let table_name =
            aggregated_table_name(&topic, config.window_minutes, &group_by, &aggregation);
        let create_statement = create_table_as_select(
            &table_name,
            &topic,
            &group_by,
            &aggregation,
            &config,
            policy,
        )?;

        debug!(table = %table_name, "Generated windowed aggregation statement");

        Ok(Self {
            base,
            group_by,
            aggregation,
            config,
            table_name,
            create_statement,
        })
    }

    /// `{topic}_WINDOW_{n}MIN_AGG_{hash}`
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn create_statement(&self) -> &str {
        &self.create_statement
    }

    pub fn pull_query(&self) -> String {
        pull_query(&self.table_name)
    }

    pub fn window_minutes(&self) -> u32 {
        self.config.window_minutes
    }

    pub fn group_by(&self) -> &GroupBy {
        &self.group_by
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn config(&self) -> &WindowAggregationConfig {
        &self.config
    }

    /// Create the aggregation table
    pub async fn materialize(&self, executor: &dyn StatementExecutor) -> QueryResult<()> {
        executor.execute(&self.create_statement).await?;
        info!(table = %self.table_name, "Materialized windowed aggregation");
        Ok(())
    }

    /// Pull the current rows of the aggregation table
    pub async fn results<R>(&self, executor: &dyn StatementExecutor) -> QueryResult<Vec<R>>
    where
        R: DeserializeOwned,
    {
        let rows = executor.pull(&self.pull_query()).await?;

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| QueryError::Execution {
                    table: self.table_name.clone(),
                    reason: format!("failed to decode row: {}", e),
                })
            })
            .collect()
    }
}

#[async_trait]
impl<T> EntitySet<T> for WindowAggregatedSet<T>
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

impl<T> fmt::Display for WindowAggregatedSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WindowAggregatedSet - {}min -> {}",
            self.config.window_minutes, self.table_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::entity_set::MemoryEntitySet;
    use parking_lot::Mutex;
    use serde::Deserialize;

    #[derive(Default)]
    struct RecordingExecutor {
        executed: Mutex<Vec<String>>,
        pulled: Mutex<Vec<String>>,
        rows: Vec<serde_json::Value>,
    }

    #[async_trait]
    impl StatementExecutor for RecordingExecutor {
        async fn execute(&self, statement: &str) -> QueryResult<()> {
            self.executed.lock().push(statement.to_string());
            Ok(())
        }

        async fn pull(&self, query: &str) -> QueryResult<Vec<serde_json::Value>> {
            self.pulled.lock().push(query.to_string());
            Ok(self.rows.clone())
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "UPPERCASE")]
    struct CustomerTotal {
        customerid: String,
        total: u64,
    }

    fn aggregated() -> WindowAggregatedSet<u32> {
        let base: Arc<dyn EntitySet<u32>> = Arc::new(MemoryEntitySet::new("orders"));
        WindowAggregatedSet::new(
            base,
            GroupBy::column("customerId"),
            Aggregation::new()
                .column("CUSTOMERID", "customerId")
                .sum("TOTAL", "amount"),
            WindowAggregationConfig::new(5),
            UnsupportedPolicy::Placeholder,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_materialize_and_pull() {
        let set = aggregated();
        let executor = RecordingExecutor {
            rows: vec![
                serde_json::json!({ "CUSTOMERID": "c1", "TOTAL": 30 }),
                serde_json::json!({ "CUSTOMERID": "c2", "TOTAL": 5 }),
            ],
            ..Default::default()
        };

        set.materialize(&executor).await.unwrap();
        let rows: Vec<CustomerTotal> = set.results(&executor).await.unwrap();

        assert_eq!(executor.executed.lock().as_slice(), &[set.create_statement().to_string()]);
        assert_eq!(
            executor.pulled.lock().as_slice(),
            &[format!("SELECT * FROM {}", set.table_name())]
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            CustomerTotal {
                customerid: "c1".to_string(),
                total: 30
            }
        );
    }

    #[tokio::test]
    async fn test_undecodable_rows_fail() {
        let set = aggregated();
        let executor = RecordingExecutor {
            rows: vec![serde_json::json!({ "unexpected": true })],
            ..Default::default()
        };

        let result: QueryResult<Vec<CustomerTotal>> = set.results(&executor).await;
        assert!(matches!(result, Err(QueryError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_reads_and_writes_go_to_base() {
        let set = aggregated();
        set.add(7).await.unwrap();
        assert_eq!(set.to_list().await.unwrap(), vec![7]);
        assert_eq!(set.topic_name(), "orders");
        assert!(set.to_string().contains(set.table_name()));
    }

    #[test]
    fn test_reject_policy_fails_binding() {
        let base: Arc<dyn EntitySet<u32>> = Arc::new(MemoryEntitySet::new("orders"));
        let result = WindowAggregatedSet::new(
            base,
            GroupBy::all(),
            Aggregation::new().call(
                "Mid",
                crate::query::expr::AggregateKind::from_call_name("Median"),
                Some("amount"),
            ),
            WindowAggregationConfig::new(5),
            UnsupportedPolicy::Reject,
        );
        assert!(matches!(result, Err(QueryError::UnsupportedAggregation { .. })));
    }
}
