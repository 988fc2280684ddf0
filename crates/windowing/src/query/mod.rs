//! Query binding over windowed topics
//!
//! Binds configured window sizes to entity-set handles and generates the
//! streaming SQL that materializes windowed aggregations:
//! - [`WindowCollection`]: per-size handles for a topic
//! - [`WindowedEntitySet`]: one window size, entry point for aggregations
//! - [`WindowAggregatedSet`]: a generated aggregation table
//! - [`WindowFilteredSet`]: finalized rows restricted to one window size

pub mod aggregated;
pub mod collection;
pub mod entity_set;
pub mod expr;
pub mod filtered;
pub mod ksql;
pub mod windowed;

pub use aggregated::WindowAggregatedSet;
pub use collection::WindowCollection;
pub use entity_set::{EntitySet, MemoryEntitySet, StatementExecutor};
pub use expr::{AggregateKind, Aggregation, GroupBy, SelectExpr, SelectItem, ALL_GROUP};
pub use filtered::{WindowFilteredSet, WindowTagged};
pub use ksql::{UnsupportedPolicy, WindowAggregationConfig};
pub use windowed::WindowedEntitySet;
