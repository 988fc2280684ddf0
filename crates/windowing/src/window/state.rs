//! Per-window mutable state
//!
//! A [`WindowState`] buffers the events of one (grouping key, window start,
//! window size) triple until the window is finalized. The lifecycle is
//! `Active -> Finalized`, taken at most once unless a failed finalization
//! rolls it back.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::types::WindowBounds;

#[derive(Debug)]
struct StateInner<T> {
    events: Vec<T>,
    is_finalized: bool,
    last_updated: DateTime<Utc>,
}

/// Buffered events and lifecycle flag of one window
#[derive(Debug)]
pub struct WindowState<T> {
    key: String,
    bounds: WindowBounds,
    window_minutes: u32,
    inner: Mutex<StateInner<T>>,
}

impl<T> WindowState<T> {
    /// Create an active, empty window state
    pub fn new(key: String, bounds: WindowBounds, window_minutes: u32, now: DateTime<Utc>) -> Self {
        Self {
            key,
            bounds,
            window_minutes,
            inner: Mutex::new(StateInner {
                events: Vec::new(),
                is_finalized: false,
                last_updated: now,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn bounds(&self) -> WindowBounds {
        self.bounds
    }

    pub fn window_minutes(&self) -> u32 {
        self.window_minutes
    }

    /// Append an event; returns `false` if the window is already finalized
    pub fn push(&self, event: T, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_finalized {
            return false;
        }
        inner.events.push(event);
        inner.last_updated = now;
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.lock().is_finalized
    }

    pub fn event_count(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.inner.lock().last_updated
    }

    /// Whether the window may be finalized at `now`
    pub fn is_ready(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        !self.is_finalized() && now >= self.bounds.end + grace
    }

    /// Whether a finalized window is past retention at `now`
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.is_finalized() && self.bounds.end < now - retention
    }

    /// Flip the window to finalized and take its buffered events
    ///
    /// Returns `None` if another caller already finalized the window.
    pub fn begin_finalization(&self, now: DateTime<Utc>) -> Option<Vec<T>> {
        let mut inner = self.inner.lock();
        if inner.is_finalized {
            return None;
        }
        inner.is_finalized = true;
        inner.last_updated = now;
        Some(std::mem::take(&mut inner.events))
    }

    /// Undo [`begin_finalization`](Self::begin_finalization) after a failure
    pub fn rollback_finalization(&self, events: Vec<T>, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.is_finalized = false;
        inner.events = events;
        inner.last_updated = now;
    }
}
