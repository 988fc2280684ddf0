//! Deduplicating store of finalized windows
//!
//! Several processes may finalize the same window. The store keeps the first
//! message it persists for each window key through a [`StateBackend`] and
//! answers point, range and size queries.
//!
//! Deliveries of one window key are serialized behind a per-key claim lock.
//! A delivery only counts as a duplicate once another one has been
//! persisted, so a failed write never shadows a later valid copy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::core::{system_clock, SharedClock};
use crate::error::{StateError, StateResult};
use crate::sink::RoutedMessage;
use crate::state::StateBackend;
use crate::window::WindowFinalMessage;

/// Key prefix of persisted finalized window records
pub const RECORD_PREFIX: &str = "window_final:";

/// Default lookback of [`FinalizedWindowStore::get_by_size`]
pub const DEFAULT_SIZE_LOOKBACK_DAYS: i64 = 7;

/// Retry policy of [`FinalizedWindowStore::spawn_relay`]
#[derive(Debug, Clone, Copy)]
pub struct RelayRetry {
    /// Retries per message before the relay gives up
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_backoff: StdDuration,
    pub max_backoff: StdDuration,
}

impl Default for RelayRetry {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: StdDuration::from_millis(100),
            max_backoff: StdDuration::from_secs(10),
        }
    }
}

impl RelayRetry {
    fn backoff(&self, retry_count: u32) -> StdDuration {
        let delay = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(retry_count.min(10)));
        delay.min(self.max_backoff)
    }
}

/// Result of offering a message to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// First message for its window key; persisted
    Accepted,
    /// A message for the same window key was already accepted
    Duplicate,
}

/// Callback invoked for every newly accepted message
#[async_trait]
pub trait FinalizedWindowHandler: Send + Sync {
    async fn on_finalized(&self, message: &WindowFinalMessage);
}

/// Persisted key of a window record
pub fn record_key(window_key: &str) -> String {
    format!("{}{}", RECORD_PREFIX, window_key)
}

/// First-writer-wins store of finalized windows
pub struct FinalizedWindowStore {
    backend: Arc<dyn StateBackend>,
    /// Persisted windows
    cache: DashMap<String, WindowFinalMessage>,
    /// Per-key locks held while a delivery is checked and persisted
    claims: DashMap<String, Arc<Mutex<()>>>,
    handler: Option<Arc<dyn FinalizedWindowHandler>>,
    clock: SharedClock,
    retention: Duration,
    duplicates: AtomicU64,
}

impl FinalizedWindowStore {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        handler: Option<Arc<dyn FinalizedWindowHandler>>,
    ) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
            claims: DashMap::new(),
            handler,
            clock: system_clock(),
            retention: Duration::hours(i64::from(crate::window::DEFAULT_RETENTION_HOURS)),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Open the configured backend and adopt its retention
    pub async fn from_config(
        config: &StoreConfig,
        handler: Option<Arc<dyn FinalizedWindowHandler>>,
    ) -> StateResult<Self> {
        let backend = config.open_backend().await?;
        Ok(Self::new(backend, handler).with_retention(config.retention()))
    }

    /// Use `clock` for the default lookback of size queries and purging
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// How long records are kept by [`purge`](Self::purge)
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Accept `message` unless its window was already persisted
    ///
    /// Concurrent deliveries of one window wait for each other. If persisting
    /// fails the error is returned and the next delivery may still win.
    pub async fn handle(&self, message: WindowFinalMessage) -> StateResult<HandleOutcome> {
        let key = message.window_key.clone();

        let claim = self.claims.entry(key.clone()).or_default().clone();
        let outcome = {
            let _guard = claim.lock().await;
            self.claim_and_persist(&key, &message).await
        };
        // Drop the lock once nobody else holds or waits for it
        self.claims
            .remove_if(&key, |_, lock| Arc::ptr_eq(lock, &claim) && Arc::strong_count(lock) == 2);

        if outcome? == HandleOutcome::Duplicate {
            return Ok(HandleOutcome::Duplicate);
        }

        debug!(
            window_key = %key,
            pod_id = %message.pod_id,
            event_count = message.event_count,
            "Accepted finalized window"
        );

        if let Some(handler) = &self.handler {
            handler.on_finalized(&message).await;
        }

        Ok(HandleOutcome::Accepted)
    }

    /// Runs under the claim lock of `key`
    async fn claim_and_persist(
        &self,
        key: &str,
        message: &WindowFinalMessage,
    ) -> StateResult<HandleOutcome> {
        if let Some(existing) = self.cache.get(key) {
            self.record_duplicate(existing.value(), message);
            return Ok(HandleOutcome::Duplicate);
        }

        let stored_key = record_key(key);

        // Records accepted before a restart are only on the backend
        if let Some(bytes) = self.backend.get(stored_key.as_bytes()).await? {
            let existing = decode(&stored_key, &bytes)?;
            self.record_duplicate(&existing, message);
            self.cache.insert(key.to_string(), existing);
            return Ok(HandleOutcome::Duplicate);
        }

        let bytes = serde_json::to_vec(message).map_err(|e| StateError::SerializationFailed {
            key: stored_key.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = self.backend.put(stored_key.as_bytes(), &bytes).await {
            error!(window_key = %key, error = %e, "Failed to persist finalized window");
            return Err(e);
        }

        self.cache.insert(key.to_string(), message.clone());
        Ok(HandleOutcome::Accepted)
    }

    fn record_duplicate(&self, existing: &WindowFinalMessage, incoming: &WindowFinalMessage) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
        debug!(
            window_key = %incoming.window_key,
            existing_pod = %existing.pod_id,
            incoming_pod = %incoming.pod_id,
            "Ignoring duplicate finalized window"
        );
    }

    /// Look up a finalized window by key
    pub async fn get(&self, window_key: &str) -> StateResult<Option<WindowFinalMessage>> {
        if let Some(entry) = self.cache.get(window_key) {
            return Ok(Some(entry.value().clone()));
        }

        let stored_key = record_key(window_key);
        let Some(bytes) = self.backend.get(stored_key.as_bytes()).await? else {
            return Ok(None);
        };

        let message = decode(&stored_key, &bytes)?;
        let cached = self
            .cache
            .entry(window_key.to_string())
            .or_insert(message)
            .value()
            .clone();
        Ok(Some(cached))
    }

    /// Windows lying entirely within `[start, end]`, ordered by start
    pub async fn get_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StateResult<Vec<WindowFinalMessage>> {
        let mut windows: Vec<WindowFinalMessage> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|m| m.window_start >= start && m.window_end <= end)
            .collect();
        sort_by_start(&mut windows);
        Ok(windows)
    }

    /// Windows of exactly `window_minutes` starting at or after `since`
    ///
    /// `since` defaults to seven days before now.
    pub async fn get_by_size(
        &self,
        window_minutes: u32,
        since: Option<DateTime<Utc>>,
    ) -> StateResult<Vec<WindowFinalMessage>> {
        let since =
            since.unwrap_or_else(|| self.clock.now() - Duration::days(DEFAULT_SIZE_LOOKBACK_DAYS));

        let mut windows: Vec<WindowFinalMessage> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|m| m.window_minutes == window_minutes && m.window_start >= since)
            .collect();
        sort_by_start(&mut windows);
        Ok(windows)
    }

    /// Delete records whose window ended more than `retention` before `now`
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> StateResult<usize> {
        let mut removed = 0;
        for message in self.load_all().await? {
            if message.is_expired(now, retention) {
                self.backend
                    .delete(record_key(&message.window_key).as_bytes())
                    .await?;
                self.cache.remove(&message.window_key);
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Purged expired finalized windows");
        }
        Ok(removed)
    }

    /// Delete records older than the configured retention
    pub async fn purge(&self) -> StateResult<usize> {
        self.purge_expired(self.clock.now(), self.retention).await
    }

    /// Feed messages from an in-process channel into the store
    ///
    /// A message that cannot be stored is retried with the default
    /// [`RelayRetry`] policy. See [`spawn_relay_with_retry`](Self::spawn_relay_with_retry).
    pub fn spawn_relay(
        self: &Arc<Self>,
        rx: mpsc::Receiver<RoutedMessage>,
    ) -> JoinHandle<StateResult<()>> {
        self.spawn_relay_with_retry(rx, RelayRetry::default())
    }

    /// Feed messages from an in-process channel into the store
    ///
    /// Each message is retried with exponential backoff. Once its retries are
    /// exhausted the relay stops and returns the error; the receiver is
    /// dropped so later sends fail and the tracker rolls those windows back.
    pub fn spawn_relay_with_retry(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<RoutedMessage>,
        retry: RelayRetry,
    ) -> JoinHandle<StateResult<()>> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(routed) = rx.recv().await {
                let mut retry_count = 0;
                loop {
                    match store.handle(routed.message.clone()).await {
                        Ok(_) => break,
                        Err(e) if retry_count < retry.max_retries => {
                            let delay = retry.backoff(retry_count);
                            warn!(
                                topic = %routed.topic,
                                key = %routed.key,
                                error = %e,
                                retry_count,
                                delay_ms = delay.as_millis() as u64,
                                "Retrying finalized window"
                            );
                            tokio::time::sleep(delay).await;
                            retry_count += 1;
                        }
                        Err(e) => {
                            error!(topic = %routed.topic, key = %routed.key, error = %e, "Failed to store finalized window, stopping relay");
                            return Err(e);
                        }
                    }
                }
            }
            debug!("Finalized window relay stopped");
            Ok(())
        })
    }

    /// Number of windows held in the cache
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Number of duplicate messages ignored
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Flush the backend and drop the cache
    pub async fn close(&self) -> StateResult<()> {
        self.backend.flush().await?;
        self.cache.clear();
        info!("Finalized window store closed");
        Ok(())
    }

    async fn load_all(&self) -> StateResult<Vec<WindowFinalMessage>> {
        let entries = self.backend.scan(RECORD_PREFIX.as_bytes()).await?;
        let mut messages = Vec::with_capacity(entries.len());

        for (key, value) in entries {
            let key = String::from_utf8_lossy(&key).into_owned();
            match decode(&key, &value) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable finalized window record"),
            }
        }
        Ok(messages)
    }
}

fn decode(key: &str, bytes: &[u8]) -> StateResult<WindowFinalMessage> {
    serde_json::from_slice(bytes).map_err(|e| StateError::DeserializationFailed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn sort_by_start(windows: &mut [WindowFinalMessage]) {
    windows.sort_by(|a, b| {
        a.window_start
            .cmp(&b.window_start)
            .then_with(|| a.window_minutes.cmp(&b.window_minutes))
            .then_with(|| a.window_key.cmp(&b.window_key))
    });
}
