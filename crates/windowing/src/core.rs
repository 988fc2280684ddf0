//! Core extraction traits and time sources
//!
//! This module provides the small seams the rest of the engine is built on:
//! - KeyExtractor: derives the grouping key of an entity
//! - EventTimeExtractor: derives the event timestamp of an entity
//! - Clock: supplies "now" so finalization stays deterministic under test

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Trait for extracting grouping keys from entities
///
/// The extracted key becomes the prefix of every window key the entity is
/// buffered under, so it must be stable for equal entities.
pub trait KeyExtractor<T>: Send + Sync {
    /// Extract the grouping key from the entity
    fn extract_key(&self, entity: &T) -> String;
}

impl<T, F> KeyExtractor<T> for F
where
    F: Fn(&T) -> String + Send + Sync,
{
    fn extract_key(&self, entity: &T) -> String {
        self(entity)
    }
}

/// Trait for extracting event time from entities
pub trait EventTimeExtractor<T>: Send + Sync {
    /// Extract the event timestamp from the entity
    fn extract_event_time(&self, entity: &T) -> DateTime<Utc>;
}

impl<T, F> EventTimeExtractor<T> for F
where
    F: Fn(&T) -> DateTime<Utc> + Send + Sync,
{
    fn extract_event_time(&self, entity: &T) -> DateTime<Utc> {
        self(entity)
    }
}

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write() = instant;
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Shared handle to a clock
pub type SharedClock = Arc<dyn Clock>;

/// Default clock handle
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
