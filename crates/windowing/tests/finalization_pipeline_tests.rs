//! End-to-end tests: tracker -> sink -> finalized window store

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use windowing::sink::RoutedMessage;
use windowing::{
    window_key, ChannelSink, FinalizationScheduler, FinalizedWindowStore, HandleOutcome,
    ManualClock, MemoryStateBackend, SchedulerConfig, SledConfig, SledStateBackend,
    StateBackend, WindowConfiguration, WindowFinalMessage, WindowStateTracker,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Trade {
    symbol: String,
    price: f64,
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

fn trade(symbol: &str, price: f64) -> Trade {
    Trade {
        symbol: symbol.to_string(),
        price,
    }
}

fn trades_config(sink: ChannelSink, pod_id: &str) -> WindowConfiguration<Trade> {
    WindowConfiguration::builder("trades", Arc::new(sink))
        .windows([1, 5])
        .key_extractor(|t: &Trade| t.symbol.clone())
        .aggregation(|events: &[Trade]| {
            let high = events.iter().map(|t| t.price).fold(f64::MIN, f64::max);
            Ok(serde_json::json!({ "high": high }))
        })
        .pod_id(pod_id)
        .build()
        .unwrap()
}

async fn wait_for(store: &FinalizedWindowStore, key: &str) -> WindowFinalMessage {
    for _ in 0..200 {
        if let Some(message) = store.get(key).await.unwrap() {
            return message;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("window {} was never stored", key);
}

#[tokio::test]
async fn test_tracker_publishes_into_store() {
    let clock = ManualClock::new(at(10, 0, 0));
    let (sink, rx) = ChannelSink::new(64);
    let tracker = WindowStateTracker::new(trades_config(sink, "pod-a"), Arc::new(clock.clone()));

    let store = Arc::new(FinalizedWindowStore::new(
        Arc::new(MemoryStateBackend::new()),
        None,
    ));
    let relay = store.spawn_relay(rx);

    clock.set(at(10, 1, 0));
    tracker.add_event(&trade("ACME", 10.0), at(10, 1, 0));
    clock.set(at(10, 4, 0));
    tracker.add_event(&trade("ACME", 12.5), at(10, 4, 0));

    clock.set(at(10, 5, 3));
    tracker.process_finalization(at(10, 5, 3)).await;

    let key = window_key("ACME", at(10, 1, 0), 5);
    let message = wait_for(&store, &key).await;
    assert_eq!(message.event_count, 2);
    assert_eq!(message.window_start, at(10, 0, 0));
    assert_eq!(message.window_end, at(10, 5, 0));
    assert_eq!(message.aggregated_data["high"], 12.5);
    assert_eq!(message.pod_id, "pod-a");

    // The 1-minute windows of each event are finalized separately
    let first = wait_for(&store, &window_key("ACME", at(10, 1, 0), 1)).await;
    let second = wait_for(&store, &window_key("ACME", at(10, 4, 0), 1)).await;
    assert_eq!(first.event_count, 1);
    assert_eq!(second.event_count, 1);

    drop(tracker);
    relay.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_competing_pods_keep_first_result() {
    let clock = ManualClock::new(at(10, 0, 0));
    let (sink_a, mut rx_a) = ChannelSink::new(64);
    let (sink_b, mut rx_b) = ChannelSink::new(64);
    let pod_a = WindowStateTracker::new(trades_config(sink_a, "pod-a"), Arc::new(clock.clone()));
    let pod_b = WindowStateTracker::new(trades_config(sink_b, "pod-b"), Arc::new(clock.clone()));

    clock.set(at(10, 2, 0));
    pod_a.add_event(&trade("ACME", 10.0), at(10, 2, 0));
    pod_b.add_event(&trade("ACME", 11.0), at(10, 2, 0));

    clock.set(at(10, 5, 3));
    pod_a.process_finalization(at(10, 5, 3)).await;
    pod_b.process_finalization(at(10, 5, 3)).await;

    let store = FinalizedWindowStore::new(Arc::new(MemoryStateBackend::new()), None);
    let key = window_key("ACME", at(10, 2, 0), 5);

    let from_pod = |rx: &mut tokio::sync::mpsc::Receiver<RoutedMessage>| {
        let mut found = None;
        while let Ok(routed) = rx.try_recv() {
            if routed.key == key {
                found = Some(routed.message);
            }
        }
        found.unwrap()
    };
    let message_a = from_pod(&mut rx_a);
    let message_b = from_pod(&mut rx_b);

    assert_eq!(store.handle(message_b).await.unwrap(), HandleOutcome::Accepted);
    assert_eq!(store.handle(message_a).await.unwrap(), HandleOutcome::Duplicate);

    let stored = store.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.pod_id, "pod-b");
    assert_eq!(store.duplicate_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_pods_persist_one_record_per_window() {
    let clock = ManualClock::new(at(10, 0, 0));
    let backend = Arc::new(MemoryStateBackend::new());
    let store = Arc::new(FinalizedWindowStore::new(backend.clone(), None));

    let mut pods = Vec::new();
    let mut relays = Vec::new();
    for pod in ["pod-a", "pod-b", "pod-c"] {
        let (sink, rx) = ChannelSink::new(256);
        relays.push(store.spawn_relay(rx));
        pods.push(Arc::new(WindowStateTracker::new(
            trades_config(sink, pod),
            Arc::new(clock.clone()),
        )));
    }

    clock.set(at(10, 4, 0));
    for pod in &pods {
        for minute in 0..5 {
            pod.add_event(&trade("ACME", 10.0), at(10, minute, 0));
            pod.add_event(&trade("INTC", 20.0), at(10, minute, 30));
        }
    }

    clock.set(at(10, 5, 3));
    let passes: Vec<_> = pods
        .iter()
        .map(|pod| {
            let pod = pod.clone();
            tokio::spawn(async move { pod.process_finalization(at(10, 5, 3)).await })
        })
        .collect();
    for pass in passes {
        assert_eq!(pass.await.unwrap().failed, 0);
    }

    drop(pods);
    for relay in relays {
        relay.await.unwrap().unwrap();
    }

    let acme = store.get(&window_key("ACME", at(10, 0, 0), 5)).await.unwrap().unwrap();
    assert_eq!(acme.event_count, 5);

    // Per symbol: five 1-minute windows and one 5-minute window
    let records = store.get_in_range(at(10, 0, 0), at(10, 5, 0)).await.unwrap();
    let mut keys: Vec<String> = records
        .iter()
        .map(|m| m.window_key.clone())
        .filter(|k| !k.starts_with("empty_"))
        .collect();
    let total = keys.len();
    keys.sort();
    keys.dedup();
    assert_eq!(total, 12);
    assert_eq!(keys.len(), total);

    // Placeholder windows included, every window was persisted once
    let everything = store.get_in_range(at(9, 0, 0), at(11, 0, 0)).await.unwrap();
    let persisted = backend
        .list_keys(windowing::store::RECORD_PREFIX.as_bytes())
        .await
        .unwrap();
    assert_eq!(persisted.len(), everything.len());
    assert_eq!(store.duplicate_count() as usize, 2 * everything.len());
}

#[tokio::test]
async fn test_scheduler_timer_finalizes_registered_trackers() {
    let clock = ManualClock::new(at(10, 0, 0));
    let scheduler = FinalizationScheduler::new(
        SchedulerConfig {
            tick_interval_ms: 10,
            ..SchedulerConfig::default()
        },
        Arc::new(clock.clone()),
    );

    let (sink, mut rx) = ChannelSink::new(256);
    let tracker = scheduler
        .register_tracker(trades_config(sink, "pod-a"))
        .unwrap();

    clock.set(at(10, 3, 0));
    tracker.add_event(&trade("ACME", 10.0), at(10, 3, 0));

    scheduler.start().await.unwrap();
    clock.set(at(10, 5, 3));

    let key = window_key("ACME", at(10, 3, 0), 5);
    let message = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(routed) if routed.key == key => return routed.message,
                Some(_) => continue,
                None => panic!("sink closed"),
            }
        }
    })
    .await
    .expect("window finalized by the timer");

    assert_eq!(message.event_count, 1);
    assert_eq!(message.window_minutes, 5);

    scheduler.shutdown().await;
    assert!(scheduler.is_stopped());
    assert_eq!(scheduler.tracker_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sled_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let message = WindowFinalMessage {
        window_key: window_key("ACME", at(10, 0, 0), 5),
        window_start: at(10, 0, 0),
        window_end: at(10, 5, 0),
        window_minutes: 5,
        event_count: 3,
        aggregated_data: serde_json::json!({ "high": 12.5 }),
        finalized_at: at(10, 5, 3),
        pod_id: "pod-a".to_string(),
    };

    {
        let backend = SledStateBackend::open(SledConfig::new(dir.path())).await.unwrap();
        let store = FinalizedWindowStore::new(Arc::new(backend), None);
        assert_eq!(
            store.handle(message.clone()).await.unwrap(),
            HandleOutcome::Accepted
        );
        store.close().await.unwrap();
    }

    let backend: Arc<dyn StateBackend> =
        Arc::new(SledStateBackend::open(SledConfig::new(dir.path())).await.unwrap());
    let store = FinalizedWindowStore::new(backend, None);

    let mut later = message.clone();
    later.pod_id = "pod-b".to_string();
    assert_eq!(store.handle(later).await.unwrap(), HandleOutcome::Duplicate);

    let windows = store.get_by_size(5, Some(at(0, 0, 0))).await.unwrap();
    assert_eq!(windows, vec![message]);
    assert!(store
        .get_in_range(at(11, 0, 0), at(12, 0, 0))
        .await
        .unwrap()
        .is_empty());
}
