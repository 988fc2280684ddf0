//! Periodic finalization of registered window trackers
//!
//! The [`FinalizationScheduler`] owns one tracker per (entity type, topic)
//! and sweeps all of them on a fixed interval. Each sweep fans out one task
//! per tracker, bounded by a semaphore, and waits for them with a soft
//! timeout: tasks still running when the timeout elapses are left to finish
//! in the background.

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SchedulerConfig;
use crate::core::SharedClock;
use crate::error::{WindowError, WindowResult};
use crate::window::{
    FinalizationReport, TrackerStats, WindowConfiguration, WindowProcessor, WindowStateTracker,
};

/// Outcome of one sweep over every registered tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Trackers swept
    pub trackers: usize,
    /// Totals of the tracker passes that completed in time
    pub totals: FinalizationReport,
    /// Whether the sweep gave up waiting on some trackers
    pub timed_out: bool,
}

struct RegisteredTracker {
    processor: Arc<dyn WindowProcessor>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// Drives finalization of every registered tracker
pub struct FinalizationScheduler {
    config: SchedulerConfig,
    clock: SharedClock,
    trackers: Arc<DashMap<String, RegisteredTracker>>,
    semaphore: Arc<Semaphore>,
    stopped: Arc<AtomicBool>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl FinalizationScheduler {
    pub fn new(config: SchedulerConfig, clock: SharedClock) -> Self {
        let permits = config.max_concurrent_finalizations.max(1);
        Self {
            config,
            clock,
            trackers: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(permits)),
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown_tx: Mutex::new(None),
            task_handle: Mutex::new(None),
        }
    }

    /// Register a window configuration
    ///
    /// Registration is idempotent per entity type and topic: registering the
    /// same pair again returns the existing tracker and ignores `config`.
    pub fn register_tracker<T>(
        &self,
        config: WindowConfiguration<T>,
    ) -> WindowResult<Arc<WindowStateTracker<T>>>
    where
        T: Send + Sync + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(WindowError::SchedulerStopped);
        }

        let key = format!("{}_{}", type_name::<T>(), config.topic_name());

        match self.trackers.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(tracker = %key, "Tracker already registered");
                Arc::clone(&entry.get().typed)
                    .downcast::<WindowStateTracker<T>>()
                    .map_err(|_| WindowError::TrackerTypeMismatch { key })
            }
            Entry::Vacant(entry) => {
                let tracker = Arc::new(WindowStateTracker::new(config, Arc::clone(&self.clock)));
                entry.insert(RegisteredTracker {
                    processor: tracker.clone(),
                    typed: tracker.clone(),
                });
                info!(tracker = %key, windows = ?tracker.config().windows(), "Registered window tracker");
                Ok(tracker)
            }
        }
    }

    /// Number of registered trackers
    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    /// Counters of every registered tracker, by registration key
    pub fn tracker_stats(&self) -> BTreeMap<String, TrackerStats> {
        self.trackers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().processor.stats()))
            .collect()
    }

    /// Start the background tick loop
    pub async fn start(&self) -> WindowResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(WindowError::SchedulerStopped);
        }

        let mut handle_guard = self.task_handle.lock().await;
        if handle_guard.is_some() {
            warn!("Finalization scheduler already started");
            return Ok(());
        }

        let tick_interval = self.config.tick_interval();
        info!("Starting finalization scheduler with interval {:?}", tick_interval);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown_tx.lock().await = Some(shutdown_tx);

        let trackers = Arc::clone(&self.trackers);
        let semaphore = Arc::clone(&self.semaphore);
        let stopped = Arc::clone(&self.stopped);
        let clock = Arc::clone(&self.clock);
        let sweep_timeout = self.config.sweep_timeout();

        let handle = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(tick_interval);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        if stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        sweep(&trackers, &semaphore, sweep_timeout, clock.now()).await;
                    }
                    _ = &mut shutdown_rx => {
                        info!("Finalization scheduler loop stopping");
                        break;
                    }
                }
            }
        });

        *handle_guard = Some(handle);
        Ok(())
    }

    /// Run one sweep immediately at `now`
    ///
    /// Does nothing once the scheduler is shut down.
    pub async fn tick_now(&self, now: DateTime<Utc>) -> SweepReport {
        if self.stopped.load(Ordering::SeqCst) {
            return SweepReport::default();
        }
        sweep(
            &self.trackers,
            &self.semaphore,
            self.config.sweep_timeout(),
            now,
        )
        .await
    }

    /// Stop the tick loop, dispose every tracker and clear the registry
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down finalization scheduler");

        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }

        // The loop only observes the signal between sweeps
        if let Some(handle) = self.task_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Scheduler task panicked: {}", e);
            }
        }

        for entry in self.trackers.iter() {
            entry.value().processor.dispose();
        }
        self.trackers.clear();

        info!("Finalization scheduler shutdown complete");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[instrument(skip(trackers, semaphore, sweep_timeout))]
async fn sweep(
    trackers: &DashMap<String, RegisteredTracker>,
    semaphore: &Arc<Semaphore>,
    sweep_timeout: std::time::Duration,
    now: DateTime<Utc>,
) -> SweepReport {
    let processors: Vec<Arc<dyn WindowProcessor>> = trackers
        .iter()
        .map(|entry| Arc::clone(&entry.value().processor))
        .collect();

    let mut report = SweepReport {
        trackers: processors.len(),
        ..SweepReport::default()
    };
    if processors.is_empty() {
        return report;
    }

    let tasks: Vec<JoinHandle<Option<FinalizationReport>>> = processors
        .into_iter()
        .map(|processor| {
            let semaphore = Arc::clone(semaphore);
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                Some(processor.process_finalization(now).await)
            })
        })
        .collect();

    match tokio::time::timeout(sweep_timeout, join_all(tasks)).await {
        Ok(results) => {
            for result in results {
                match result {
                    Ok(Some(pass)) => report.totals.merge(pass),
                    Ok(None) => {}
                    Err(e) => error!("Finalization task failed: {}", e),
                }
            }
        }
        Err(_) => {
            warn!(
                timeout = ?sweep_timeout,
                "Finalization sweep timed out, unfinished trackers keep running"
            );
            report.timed_out = true;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::sink::{ChannelSink, RoutedMessage};
    use chrono::TimeZone;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone)]
    struct Reading {
        sensor: String,
    }

    #[derive(Debug, Clone)]
    struct Alert;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn readings_config(topic: &str) -> (WindowConfiguration<Reading>, mpsc::Receiver<RoutedMessage>) {
        let (sink, rx) = ChannelSink::new(1024);
        let config = WindowConfiguration::builder(topic, Arc::new(sink))
            .windows([1, 5])
            .key_extractor(|r: &Reading| r.sensor.clone())
            .build()
            .unwrap();
        (config, rx)
    }

    fn scheduler(clock: &ManualClock, tick: Duration) -> FinalizationScheduler {
        let config = SchedulerConfig {
            tick_interval_ms: tick.as_millis() as u64,
            ..SchedulerConfig::default()
        };
        FinalizationScheduler::new(config, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let clock = ManualClock::new(at(10, 0, 0));
        let scheduler = scheduler(&clock, Duration::from_secs(1));

        let (first_config, _rx1) = readings_config("readings");
        let (second_config, _rx2) = readings_config("readings");

        let first = scheduler.register_tracker(first_config).unwrap();
        let second = scheduler.register_tracker(second_config).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(scheduler.tracker_count(), 1);
    }

    #[tokio::test]
    async fn test_register_distinct_types_and_topics() {
        let clock = ManualClock::new(at(10, 0, 0));
        let scheduler = scheduler(&clock, Duration::from_secs(1));

        let (a, _rx1) = readings_config("readings");
        let (b, _rx2) = readings_config("readings_eu");
        let (sink, _rx3) = ChannelSink::new(16);
        let alerts = WindowConfiguration::<Alert>::builder("readings", Arc::new(sink))
            .window(5)
            .build()
            .unwrap();

        scheduler.register_tracker(a).unwrap();
        scheduler.register_tracker(b).unwrap();
        scheduler.register_tracker(alerts).unwrap();

        assert_eq!(scheduler.tracker_count(), 3);
        assert_eq!(scheduler.tracker_stats().len(), 3);
    }

    #[tokio::test]
    async fn test_tick_now_finalizes_ready_windows() {
        let clock = ManualClock::new(at(10, 0, 0));
        let scheduler = scheduler(&clock, Duration::from_secs(1));

        let (config, mut rx) = readings_config("readings");
        let tracker = scheduler.register_tracker(config).unwrap();
        tracker.add_event(
            &Reading {
                sensor: "s1".to_string(),
            },
            at(10, 2, 0),
        );

        let report = scheduler.tick_now(at(10, 5, 3)).await;
        assert_eq!(report.trackers, 1);
        assert!(!report.timed_out);
        assert!(report.totals.finalized >= 2);

        let mut keys = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            keys.push(msg.key);
        }
        assert!(keys.contains(&"s1_202403011002_1min".to_string()));
        assert!(keys.contains(&"s1_202403011000_5min".to_string()));
    }

    #[tokio::test]
    async fn test_background_loop_finalizes_on_timer() {
        let clock = ManualClock::new(at(10, 0, 0));
        let scheduler = scheduler(&clock, Duration::from_millis(20));

        let (config, mut rx) = readings_config("readings");
        let tracker = scheduler.register_tracker(config).unwrap();
        tracker.add_event(
            &Reading {
                sensor: "s1".to_string(),
            },
            at(10, 0, 10),
        );

        scheduler.start().await.unwrap();
        clock.set(at(10, 1, 3));

        let msg = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Some(msg) if msg.key == "s1_202403011000_1min" => break msg,
                    Some(_) => continue,
                    None => panic!("sink closed"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(msg.topic, "readings_window_1_final");
        assert_eq!(msg.message.event_count, 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let clock = ManualClock::new(at(10, 0, 0));
        let scheduler = scheduler(&clock, Duration::from_millis(20));

        let (config, _rx) = readings_config("readings");
        let tracker = scheduler.register_tracker(config).unwrap();
        tracker.add_event(
            &Reading {
                sensor: "s1".to_string(),
            },
            at(10, 0, 10),
        );
        scheduler.start().await.unwrap();

        scheduler.shutdown().await;
        scheduler.shutdown().await;

        assert!(scheduler.is_stopped());
        assert_eq!(scheduler.tracker_count(), 0);
        assert_eq!(tracker.stats().active_states, 0);
        assert_eq!(scheduler.tick_now(at(11, 0, 0)).await, SweepReport::default());

        let (config, _rx) = readings_config("readings");
        assert!(matches!(
            scheduler.register_tracker(config),
            Err(WindowError::SchedulerStopped)
        ));
    }
}
