//! Streaming SQL text generation
//!
//! Renders the CREATE TABLE AS SELECT statement backing a windowed
//! aggregation, along with the window clause, GROUP BY clause, select list
//! and the pull query reading the table back.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{QueryError, QueryResult};
use crate::window::{OutputMode, WindowType, DEFAULT_GRACE_PERIOD};

use super::expr::{AggregateKind, Aggregation, GroupBy, SelectExpr};

/// Handling of aggregate calls with no streaming equivalent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedPolicy {
    /// Render `NAME(UNKNOWN)` and let the engine reject it
    #[default]
    Placeholder,
    /// Fail statement generation
    Reject,
}

/// Window settings of a generated aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregationConfig {
    pub window_minutes: u32,
    pub grace_period: Duration,
    #[serde(default)]
    pub window_type: WindowType,
    #[serde(default)]
    pub output_mode: OutputMode,
}

impl WindowAggregationConfig {
    /// Tumbling window of `window_minutes` with the default grace period
    pub fn new(window_minutes: u32) -> Self {
        Self {
            window_minutes,
            grace_period: DEFAULT_GRACE_PERIOD,
            window_type: WindowType::default(),
            output_mode: OutputMode::default(),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_window_type(mut self, window_type: WindowType) -> Self {
        self.window_type = window_type;
        self
    }

    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }
}

/// Name of the raw windowed table of a topic
pub fn window_table_name(topic: &str, window_minutes: u32) -> String {
    format!("{}_WINDOW_{}MIN", topic, window_minutes)
}

/// Name of the table materializing one aggregation
///
/// The suffix is derived from the grouping and projection text so equal
/// aggregations always map to the same table.
pub fn aggregated_table_name(
    topic: &str,
    window_minutes: u32,
    group_by: &GroupBy,
    aggregation: &Aggregation,
) -> String {
    let text = format!("{}{}", group_by, aggregation);
    let digest = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let hash = u64::from_be_bytes(prefix) % 10_000;

    format!("{}_WINDOW_{}MIN_AGG_{}", topic, window_minutes, hash)
}

/// `GROUP BY` clause, or an empty string when there are no columns
pub fn group_by_clause(group_by: &GroupBy) -> String {
    let columns = group_by.column_names();
    if columns.is_empty() {
        return String::new();
    }
    let columns: Vec<String> = columns.iter().map(|c| c.to_uppercase()).collect();
    format!("GROUP BY {}", columns.join(", "))
}

/// Comma-separated select list; `*` for an empty projection
pub fn select_clause(aggregation: &Aggregation, policy: UnsupportedPolicy) -> QueryResult<String> {
    if aggregation.items.is_empty() {
        return Ok("*".to_string());
    }

    let columns = aggregation
        .items
        .iter()
        .map(|item| {
            let expr = match &item.expr {
                SelectExpr::Column(name) => name.to_uppercase(),
                SelectExpr::Call { kind, arg } => call_expression(kind, arg.as_deref(), policy)?,
            };
            Ok(format!("{} AS {}", expr, item.alias))
        })
        .collect::<QueryResult<Vec<String>>>()?;

    Ok(columns.join(", "))
}

fn call_expression(
    kind: &AggregateKind,
    arg: Option<&str>,
    policy: UnsupportedPolicy,
) -> QueryResult<String> {
    match (kind, kind.function_name()) {
        (AggregateKind::Count, _) => Ok("COUNT(*)".to_string()),
        (_, Some(function)) => Ok(match arg {
            Some(arg) => format!("{}({})", function, arg.to_uppercase()),
            None => format!("{}(*)", function),
        }),
        (AggregateKind::Unsupported(name), None) => match policy {
            UnsupportedPolicy::Placeholder => Ok(format!("{}(UNKNOWN)", name.to_uppercase())),
            UnsupportedPolicy::Reject => Err(QueryError::UnsupportedAggregation {
                function: name.clone(),
            }),
        },
        (other, None) => Err(QueryError::UnsupportedAggregation {
            function: format!("{:?}", other),
        }),
    }
}

/// `WINDOW ...` clause for the configured window type
///
/// Hopping windows advance by half their size. Even sizes render as
/// `ADVANCE BY {n/2} MINUTES`; odd sizes render the same half step as
/// `ADVANCE BY {n*30} SECONDS` because integer minutes cannot express it.
pub fn window_clause(config: &WindowAggregationConfig) -> String {
    let size = config.window_minutes;
    let grace = format_seconds(config.grace_period);

    match config.window_type {
        WindowType::Tumbling => format!(
            "WINDOW TUMBLING (SIZE {} MINUTES, GRACE PERIOD {} SECONDS)",
            size, grace
        ),
        WindowType::Hopping => {
            let advance = if size % 2 == 0 {
                format!("{} MINUTES", size / 2)
            } else {
                format!("{} SECONDS", u64::from(size) * 30)
            };
            format!(
                "WINDOW HOPPING (SIZE {} MINUTES, ADVANCE BY {}, GRACE PERIOD {} SECONDS)",
                size, advance, grace
            )
        }
        WindowType::Session => format!("WINDOW SESSION (GAP {} MINUTES)", size),
    }
}

fn format_seconds(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{}", duration.as_secs_f64())
    }
}

/// Full CREATE TABLE AS SELECT statement
pub fn create_table_as_select(
    table_name: &str,
    source_topic: &str,
    group_by: &GroupBy,
    aggregation: &Aggregation,
    config: &WindowAggregationConfig,
    policy: UnsupportedPolicy,
) -> QueryResult<String> {
    let select = select_clause(aggregation, policy)?;
    let group_by = group_by_clause(group_by);

    let lines = [
        format!("CREATE TABLE {} AS", table_name),
        format!("SELECT {}", select),
        format!("FROM {}", source_topic),
        window_clause(config),
        group_by,
        format!("EMIT {}", config.output_mode.keyword()),
    ];

    Ok(lines
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Pull query reading a materialized table
pub fn pull_query(table_name: &str) -> String {
    format!("SELECT * FROM {}", table_name)
}
