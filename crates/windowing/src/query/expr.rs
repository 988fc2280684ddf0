//! Grouping and aggregation expressions
//!
//! A small tagged tree describing what a windowed aggregation groups by and
//! which columns it selects. Calls without a streaming equivalent are kept
//! as [`AggregateKind::Unsupported`] so statement generation can decide what
//! to do with them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Constant group used when every row falls into one group
pub const ALL_GROUP: &str = "ALL";

/// Grouping of the source rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupBy {
    /// Every row in one group; produces no GROUP BY columns
    Constant(String),
    /// Group by one column
    Column(String),
    /// Group by several columns
    Columns(Vec<String>),
}

impl GroupBy {
    /// The single-group grouping used by plain aggregations
    pub fn all() -> Self {
        GroupBy::Constant(ALL_GROUP.to_string())
    }

    pub fn column(name: impl Into<String>) -> Self {
        GroupBy::Column(name.into())
    }

    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GroupBy::Columns(names.into_iter().map(Into::into).collect())
    }

    /// Grouping column names, in declaration order
    pub fn column_names(&self) -> Vec<&str> {
        match self {
            GroupBy::Constant(_) => Vec::new(),
            GroupBy::Column(name) => vec![name.as_str()],
            GroupBy::Columns(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupBy::Constant(value) => write!(f, "x => \"{}\"", value),
            GroupBy::Column(name) => write!(f, "x => x.{}", name),
            GroupBy::Columns(names) => {
                let members: Vec<String> = names.iter().map(|n| format!("x.{}", n)).collect();
                write!(f, "x => new {{ {} }}", members.join(", "))
            }
        }
    }
}

/// Aggregate function of a select item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Sum,
    Count,
    Max,
    Min,
    Avg,
    LatestByOffset,
    EarliestByOffset,
    /// A call with no streaming equivalent, by the name it was written with
    Unsupported(String),
}

impl AggregateKind {
    /// Map a call name such as `Sum` or `LatestByOffset`, ignoring case
    pub fn from_call_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SUM" => AggregateKind::Sum,
            "COUNT" => AggregateKind::Count,
            "MAX" => AggregateKind::Max,
            "MIN" => AggregateKind::Min,
            "AVERAGE" | "AVG" => AggregateKind::Avg,
            "LATESTBYOFFSET" => AggregateKind::LatestByOffset,
            "EARLIESTBYOFFSET" => AggregateKind::EarliestByOffset,
            _ => AggregateKind::Unsupported(name.to_string()),
        }
    }

    /// Streaming function name; `None` for unsupported calls
    pub fn function_name(&self) -> Option<&'static str> {
        match self {
            AggregateKind::Sum => Some("SUM"),
            AggregateKind::Count => Some("COUNT"),
            AggregateKind::Max => Some("MAX"),
            AggregateKind::Min => Some("MIN"),
            AggregateKind::Avg => Some("AVG"),
            AggregateKind::LatestByOffset => Some("LATEST_BY_OFFSET"),
            AggregateKind::EarliestByOffset => Some("EARLIEST_BY_OFFSET"),
            AggregateKind::Unsupported(_) => None,
        }
    }

    fn call_name(&self) -> &str {
        match self {
            AggregateKind::Sum => "Sum",
            AggregateKind::Count => "Count",
            AggregateKind::Max => "Max",
            AggregateKind::Min => "Min",
            AggregateKind::Avg => "Average",
            AggregateKind::LatestByOffset => "LatestByOffset",
            AggregateKind::EarliestByOffset => "EarliestByOffset",
            AggregateKind::Unsupported(name) => name,
        }
    }
}

/// Expression of one select item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectExpr {
    /// Plain column, typically a grouping key
    Column(String),
    /// Aggregate call over an optional column
    Call {
        kind: AggregateKind,
        arg: Option<String>,
    },
}

/// One aliased select item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectItem {
    pub alias: String,
    pub expr: SelectExpr,
}

/// Projection of a grouped window
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregation {
    pub items: Vec<SelectItem>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, alias: impl Into<String>, expr: SelectExpr) -> Self {
        self.items.push(SelectItem {
            alias: alias.into(),
            expr,
        });
        self
    }

    /// Select a plain column
    pub fn column(self, alias: impl Into<String>, column: impl Into<String>) -> Self {
        self.push(alias, SelectExpr::Column(column.into()))
    }

    /// Select an aggregate call over `arg`
    pub fn call(self, alias: impl Into<String>, kind: AggregateKind, arg: Option<&str>) -> Self {
        self.push(
            alias,
            SelectExpr::Call {
                kind,
                arg: arg.map(str::to_string),
            },
        )
    }

    pub fn sum(self, alias: impl Into<String>, column: &str) -> Self {
        self.call(alias, AggregateKind::Sum, Some(column))
    }

    pub fn count(self, alias: impl Into<String>) -> Self {
        self.call(alias, AggregateKind::Count, None)
    }

    pub fn max(self, alias: impl Into<String>, column: &str) -> Self {
        self.call(alias, AggregateKind::Max, Some(column))
    }

    pub fn min(self, alias: impl Into<String>, column: &str) -> Self {
        self.call(alias, AggregateKind::Min, Some(column))
    }

    pub fn avg(self, alias: impl Into<String>, column: &str) -> Self {
        self.call(alias, AggregateKind::Avg, Some(column))
    }

    pub fn latest_by_offset(self, alias: impl Into<String>, column: &str) -> Self {
        self.call(alias, AggregateKind::LatestByOffset, Some(column))
    }

    pub fn earliest_by_offset(self, alias: impl Into<String>, column: &str) -> Self {
        self.call(alias, AggregateKind::EarliestByOffset, Some(column))
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self
            .items
            .iter()
            .map(|item| {
                let expr = match &item.expr {
                    SelectExpr::Column(name) => format!("g.Key.{}", name),
                    SelectExpr::Call { kind, arg: Some(arg) } => {
                        format!("g.{}(x => x.{})", kind.call_name(), arg)
                    }
                    SelectExpr::Call { kind, arg: None } => format!("g.{}()", kind.call_name()),
                };
                format!("{} = {}", item.alias, expr)
            })
            .collect();
        write!(f, "g => new {{ {} }}", members.join(", "))
    }
}
