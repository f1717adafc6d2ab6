//! Write-back batching against the SQLite history store.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use pinhub_core::{DeviceIdentity, VirtualPin};
use pinhub_db::{Database, DbConfig, NewPinSample};
use pinhub_sync::{BatcherConfig, PinHistoryStore, SyncResult, WriteBackBatcher};

use common::{start_gateway, test_config, token_identity};

fn pin(n: u8) -> VirtualPin {
    VirtualPin::new(n).unwrap()
}

#[tokio::test]
async fn threshold_flushes_before_the_timer() {
    let mut config = test_config();
    config.history.flush_interval_secs = 3600;
    config.history.flush_threshold = 100;
    let gw = start_gateway(config).await;
    let identity = token_identity();

    for i in 0..100 {
        gw.gateway
            .sync()
            .record_device_write(&identity, pin(1), &i.to_string())
            .await
            .unwrap();
    }

    let history = gw.db.pin_history();
    assert!(
        common::eventually(|| {
            let history = history.clone();
            async move { history.count().await.unwrap() == 100 }
        })
        .await
    );

    // Persisted in enqueue order
    let latest = history.latest(7, "V1").await.unwrap().unwrap();
    assert_eq!(latest.value, "99");
    assert_eq!(latest.owner_id, "user1");
    assert_eq!(latest.dashboard_id, 100);

    gw.gateway.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_pending_writes() {
    let mut config = test_config();
    config.history.flush_interval_secs = 3600;
    let gw = start_gateway(config).await;
    let identity = token_identity();

    for value in ["a", "b", "c"] {
        gw.gateway
            .sync()
            .record_device_write(&identity, pin(2), value)
            .await
            .unwrap();
    }
    gw.gateway
        .sync()
        .set_pin_value_with_broadcast("user1", 8, pin(2), "d", false)
        .await
        .unwrap();
    assert_eq!(gw.db.pin_history().count().await.unwrap(), 0);

    let db = gw.db.clone();
    let report = gw.gateway.shutdown().await.unwrap();
    assert_eq!(report.persisted, 4);
    assert_eq!(report.abandoned, 0);
    assert!(!report.timed_out);

    assert_eq!(db.pin_history().count_for(7, "V2").await.unwrap(), 3);
    let external = db.pin_history().latest(8, "V2").await.unwrap().unwrap();
    assert_eq!(external.value, "d");
    assert_eq!(external.dashboard_id, 0);
}

#[tokio::test]
async fn disabled_history_persists_nothing() {
    let mut config = test_config();
    config.history.enabled = false;
    let gw = start_gateway(config).await;

    gw.gateway
        .sync()
        .record_device_write(&token_identity(), pin(3), "1")
        .await
        .unwrap();
    assert_eq!(gw.gateway.sync().batcher().pending_writes(), 0);

    let db = gw.db.clone();
    gw.gateway.shutdown().await.unwrap();
    assert_eq!(db.pin_history().count().await.unwrap(), 0);
}

// =============================================================================
// Single flight
// =============================================================================

/// Store that tracks how many appends overlap.
#[derive(Default)]
struct OverlapStore {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    appended: AtomicUsize,
}

#[async_trait]
impl PinHistoryStore for OverlapStore {
    async fn append(&self, _sample: &NewPinSample) -> SyncResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.appended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn prune_keep_latest(&self, _cutoff_ms: i64) -> SyncResult<u64> {
        Ok(0)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flushes_never_overlap() {
    let store = Arc::new(OverlapStore::default());
    let config = BatcherConfig {
        flush_interval: Duration::from_secs(3600),
        flush_threshold: 10_000,
        ..BatcherConfig::default()
    };
    let (batcher, _worker) = WriteBackBatcher::new(store.clone(), config);

    for device in 1..=4 {
        let identity = DeviceIdentity::new("user1", 100, device);
        for i in 0..10 {
            batcher.enqueue(&identity, pin(1), &i.to_string());
        }
    }

    let passes = join_all((0..8).map(|_| {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.flush().await })
    }))
    .await;
    let results: Vec<Option<usize>> = passes.into_iter().map(|r| r.unwrap()).collect();

    assert!(results.iter().any(Option::is_none));
    assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(!batcher.is_flushing());

    let report = batcher.drain(Duration::from_secs(5)).await;
    assert_eq!(report.abandoned, 0);
    assert_eq!(store.appended.load(Ordering::SeqCst), 40);
}

// =============================================================================
// Bounded drain
// =============================================================================

/// Store that takes a fixed time per append.
struct SlowStore {
    delay: Duration,
    values: Mutex<Vec<String>>,
}

#[async_trait]
impl PinHistoryStore for SlowStore {
    async fn append(&self, sample: &NewPinSample) -> SyncResult<()> {
        tokio::time::sleep(self.delay).await;
        self.values.lock().unwrap().push(sample.value.clone());
        Ok(())
    }

    async fn prune_keep_latest(&self, _cutoff_ms: i64) -> SyncResult<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn timed_out_drain_accounts_for_every_write() {
    let store = Arc::new(SlowStore {
        delay: Duration::from_millis(100),
        values: Mutex::new(Vec::new()),
    });
    let config = BatcherConfig {
        flush_threshold: 10_000,
        ..BatcherConfig::default()
    };
    let (batcher, _worker) = WriteBackBatcher::new(store.clone(), config);
    let identity = DeviceIdentity::new("user1", 100, 7);
    for i in 0..10 {
        batcher.enqueue(&identity, pin(1), &i.to_string());
    }

    let report = batcher.drain(Duration::from_millis(250)).await;
    let stored = store.values.lock().unwrap().len();

    assert!(report.timed_out);
    assert!(report.persisted > 0);
    assert!(report.abandoned > 0);
    assert_eq!(report.persisted, stored);
    assert_eq!(report.persisted + report.abandoned, 10);
    assert_eq!(batcher.pending_writes(), report.abandoned);
    assert!(!batcher.is_flushing());

    // The abandoned writes are still queued, in order
    let report = batcher.drain(Duration::from_secs(5)).await;
    assert_eq!(report.abandoned, 0);
    assert!(!report.timed_out);
    let values = store.values.lock().unwrap().clone();
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(values, expected);
}

// =============================================================================
// Retention
// =============================================================================

#[tokio::test]
async fn retention_keeps_latest_sample_per_pin() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let history = db.pin_history();
    let now = Utc::now().timestamp_millis();
    let day = 86_400_000;

    let sample = |pin: &str, value: &str, ts: i64| NewPinSample {
        owner_id: "user1".into(),
        dashboard_id: 100,
        device_id: 7,
        pin: pin.into(),
        value: value.into(),
        ts,
    };
    history.insert(&sample("V1", "old", now - 10 * day)).await.unwrap();
    history.insert(&sample("V1", "older-but-latest", now - 5 * day)).await.unwrap();
    history.insert(&sample("V2", "stale", now - 10 * day)).await.unwrap();
    history.insert(&sample("V2", "fresh", now)).await.unwrap();

    let config = BatcherConfig {
        retention: Duration::from_secs(86_400),
        ..BatcherConfig::default()
    };
    let (batcher, _worker) = WriteBackBatcher::new(Arc::new(history.clone()), config);

    assert_eq!(batcher.sweep_retention().await.unwrap(), 2);
    assert_eq!(history.count().await.unwrap(), 2);
    assert_eq!(
        history.latest(7, "V1").await.unwrap().unwrap().value,
        "older-but-latest"
    );
    assert_eq!(history.latest(7, "V2").await.unwrap().unwrap().value, "fresh");
}
