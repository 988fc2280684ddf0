//! Window state tracking and finalization
//!
//! One [`WindowStateTracker`] owns every window state of one configuration,
//! across all of its window sizes. It buffers events, materializes
//! placeholder windows for silent intervals, finalizes windows once their
//! grace period has elapsed and evicts finalized windows past retention.
//!
//! The scheduler drives trackers of different entity types through the
//! type-erased [`WindowProcessor`] trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, instrument, trace};

use crate::core::{EventTimeExtractor, SharedClock};
use crate::error::{Result, WindowError};

use super::config::WindowConfiguration;
use super::key::{empty_window_key, window_bounds, window_key, window_start};
use super::message::WindowFinalMessage;
use super::state::WindowState;
use super::types::WindowBounds;

/// Outcome of one finalization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinalizationReport {
    /// Windows finalized and published
    pub finalized: usize,
    /// Windows whose aggregation or publish failed and were rolled back
    pub failed: usize,
    /// Finalized windows evicted past retention
    pub removed: usize,
}

impl FinalizationReport {
    /// Accumulate another report into this one
    pub fn merge(&mut self, other: FinalizationReport) {
        self.finalized += other.finalized;
        self.failed += other.failed;
        self.removed += other.removed;
    }
}

/// Snapshot of tracker counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    /// Events buffered, counted once per window size
    pub events_added: u64,
    /// Events dropped because their window was already finalized
    pub late_events_dropped: u64,
    pub windows_finalized: u64,
    pub finalization_failures: u64,
    /// Window states currently held
    pub active_states: usize,
}

#[derive(Debug, Default)]
struct Counters {
    events_added: AtomicU64,
    late_events_dropped: AtomicU64,
    windows_finalized: AtomicU64,
    finalization_failures: AtomicU64,
}

/// Tracks window states for one configuration
pub struct WindowStateTracker<T> {
    config: WindowConfiguration<T>,
    clock: SharedClock,
    states: DashMap<String, Arc<WindowState<T>>>,
    next_empty_start: Mutex<HashMap<u32, DateTime<Utc>>>,
    counters: Counters,
}

impl<T> WindowStateTracker<T>
where
    T: Send + Sync + 'static,
{
    /// Create a tracker; empty-window watermarks start one window before now
    pub fn new(config: WindowConfiguration<T>, clock: SharedClock) -> Self {
        let now = clock.now();
        let next_empty_start = config
            .windows()
            .iter()
            .map(|&minutes| {
                let previous = now - Duration::minutes(i64::from(minutes));
                (minutes, window_start(previous, minutes))
            })
            .collect();

        debug!(
            topic = %config.topic_name(),
            windows = ?config.windows(),
            "Created window state tracker"
        );

        Self {
            config,
            clock,
            states: DashMap::new(),
            next_empty_start: Mutex::new(next_empty_start),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &WindowConfiguration<T> {
        &self.config
    }

    /// Buffer an event in the window of every configured size
    pub fn add_event(&self, entity: &T, event_time: DateTime<Utc>)
    where
        T: Clone,
    {
        let entity_key = self.config.extract_key(entity);
        let now = self.clock.now();

        for &minutes in self.config.windows() {
            let key = window_key(&entity_key, event_time, minutes);
            let state = self
                .states
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(WindowState::new(
                        key.clone(),
                        window_bounds(event_time, minutes),
                        minutes,
                        now,
                    ))
                })
                .clone();

            if state.push(entity.clone(), now) {
                self.counters.events_added.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters
                    .late_events_dropped
                    .fetch_add(1, Ordering::Relaxed);
                trace!(window_key = %key, event_time = %event_time, "Dropped late event");
            }
        }
    }

    /// Buffer a batch of events, reading each event time with `event_time`
    pub fn add_events<'a, I, E>(&self, entities: I, event_time: &E)
    where
        T: Clone + 'a,
        I: IntoIterator<Item = &'a T>,
        E: EventTimeExtractor<T> + ?Sized,
    {
        for entity in entities {
            self.add_event(entity, event_time.extract_event_time(entity));
        }
    }

    /// Finalize every window whose grace period has elapsed at `now`
    #[instrument(skip(self), fields(topic = %self.config.topic_name()))]
    pub async fn process_finalization(&self, now: DateTime<Utc>) -> FinalizationReport {
        self.ensure_empty_windows(now);

        let grace = self.config.grace();
        let mut ready: Vec<Arc<WindowState<T>>> = self
            .states
            .iter()
            .filter(|entry| entry.value().is_ready(now, grace))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        ready.sort_by(|a, b| {
            a.bounds()
                .cmp(&b.bounds())
                .then_with(|| a.key().cmp(b.key()))
        });

        let mut report = FinalizationReport::default();
        for state in ready {
            match self.finalize_window(&state, now).await {
                Ok(true) => report.finalized += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(window_key = %state.key(), error = %e, "Window finalization failed");
                    report.failed += 1;
                }
            }
        }

        report.removed = self.cleanup_old_windows(now);

        if report.finalized > 0 || report.failed > 0 {
            debug!(
                finalized = report.finalized,
                failed = report.failed,
                removed = report.removed,
                "Finalization pass complete"
            );
        }
        report
    }

    /// Publish one window; returns `Ok(false)` if it was already finalized
    async fn finalize_window(&self, state: &WindowState<T>, now: DateTime<Utc>) -> Result<bool> {
        let Some(events) = state.begin_finalization(now) else {
            return Ok(false);
        };

        let aggregated_data = match self.config.aggregate(&events) {
            Ok(value) => value,
            Err(e) => {
                state.rollback_finalization(events, now);
                self.counters
                    .finalization_failures
                    .fetch_add(1, Ordering::Relaxed);
                return Err(WindowError::AggregationFailed {
                    window_key: state.key().to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let bounds = state.bounds();
        let message = WindowFinalMessage {
            window_key: state.key().to_string(),
            window_start: bounds.start,
            window_end: bounds.end,
            window_minutes: state.window_minutes(),
            event_count: events.len(),
            aggregated_data,
            finalized_at: now,
            pod_id: self.config.pod_id().to_string(),
        };
        let topic = self.config.final_topic_name(state.window_minutes());

        if let Err(e) = self.config.sink().send(&topic, state.key(), &message).await {
            state.rollback_finalization(events, now);
            self.counters
                .finalization_failures
                .fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }

        self.counters
            .windows_finalized
            .fetch_add(1, Ordering::Relaxed);
        info!(
            window_key = %message.window_key,
            topic = %topic,
            event_count = message.event_count,
            "Finalized window"
        );
        Ok(true)
    }

    /// Materialize placeholder windows for every boundary up to `now`
    pub fn ensure_empty_windows(&self, now: DateTime<Utc>) {
        let mut watermarks = self.next_empty_start.lock();

        for &minutes in self.config.windows() {
            let cutoff = window_start(now, minutes);
            let Some(next_start) = watermarks.get_mut(&minutes) else {
                continue;
            };

            while *next_start <= cutoff {
                let start = *next_start;
                let key = empty_window_key(start, minutes);
                self.states.entry(key.clone()).or_insert_with(|| {
                    trace!(window_key = %key, "Created empty window");
                    Arc::new(WindowState::new(
                        key.clone(),
                        WindowBounds::of_minutes(start, minutes),
                        minutes,
                        now,
                    ))
                });
                *next_start = window_start(start + Duration::minutes(i64::from(minutes)), minutes);
            }
        }
    }

    /// Evict finalized windows whose end is older than retention
    pub fn cleanup_old_windows(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.retention();
        let before = self.states.len();
        self.states
            .retain(|_, state| !state.is_expired(now, retention));
        let removed = before.saturating_sub(self.states.len());

        if removed > 0 {
            debug!(removed, "Removed expired window states");
        }
        removed
    }

    /// Look up a window state by key
    pub fn state(&self, window_key: &str) -> Option<Arc<WindowState<T>>> {
        self.states
            .get(window_key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Keys of all held window states, sorted
    pub fn window_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            events_added: self.counters.events_added.load(Ordering::Relaxed),
            late_events_dropped: self.counters.late_events_dropped.load(Ordering::Relaxed),
            windows_finalized: self.counters.windows_finalized.load(Ordering::Relaxed),
            finalization_failures: self.counters.finalization_failures.load(Ordering::Relaxed),
            active_states: self.states.len(),
        }
    }

    /// Drop every window state
    pub fn dispose(&self) {
        self.states.clear();
    }
}

/// Type-erased view of a tracker used by the scheduler
#[async_trait]
pub trait WindowProcessor: Send + Sync {
    fn topic_name(&self) -> &str;

    async fn process_finalization(&self, now: DateTime<Utc>) -> FinalizationReport;

    fn stats(&self) -> TrackerStats;

    fn dispose(&self);
}

#[async_trait]
impl<T> WindowProcessor for WindowStateTracker<T>
where
    T: Send + Sync + 'static,
{
    fn topic_name(&self) -> &str {
        self.config.topic_name()
    }

    async fn process_finalization(&self, now: DateTime<Utc>) -> FinalizationReport {
        WindowStateTracker::process_finalization(self, now).await
    }

    fn stats(&self) -> TrackerStats {
        WindowStateTracker::stats(self)
    }

    fn dispose(&self) {
        WindowStateTracker::dispose(self)
    }
}
