//! # PinSync Orchestrator
//!
//! Ties the pin store, write-back batcher, fan-out and device registry
//! together and owns the background tasks.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  set_pin_value_with_broadcast(owner, device, pin, value, exclude)      │
//! │  record_device_write(identity, pin, value)        (exclude = true)     │
//! │       │                                                                 │
//! │       ├─0─► size check                  frame body within max_body     │
//! │       ├─1─► PinStore::set_pin           cache + activity (errors out)  │
//! │       ├─2─► FanOut::publish             realtime subscribers           │
//! │       ├─3─► registry.push_virtual_write unless exclude                 │
//! │       └─4─► batcher.enqueue             if history is enabled          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Background Tasks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  FlushWorker        timer / threshold flushes, drain on shutdown       │
//! │  maintenance loop   idle-device sweep     (cleanup_interval)           │
//! │                     history retention     (retention_sweep_interval)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pinhub_core::hardware::write_body;
use pinhub_core::protocol::DEFAULT_MAX_BODY;
use pinhub_core::{DeviceIdentity, VirtualPin, DEFAULT_PIN_VALUE};

use crate::auth::{DeviceRegistry, TokenValidator};
use crate::batcher::{
    BatcherConfig, DrainReport, FlushWorker, FlushWorkerHandle, PinHistoryStore,
    WriteBackBatcher,
};
use crate::cache::KvCache;
use crate::config::GatewayConfig;
use crate::error::{SyncError, SyncResult};
use crate::fanout::FanOut;
use crate::pin_store::{PinStore, PinStoreConfig};
use crate::registry::ConnectionRegistry;

/// Dashboard id used for writes that arrive without one.
pub const DEFAULT_DASHBOARD_ID: i64 = 0;

// =============================================================================
// Settings
// =============================================================================

/// Engine settings derived from [`GatewayConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub pin_store: PinStoreConfig,
    pub batcher: BatcherConfig,
    pub history_enabled: bool,
    pub cleanup_interval: Duration,
    /// Largest `vw` body a write may produce.
    pub max_body: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pin_store: PinStoreConfig::default(),
            batcher: BatcherConfig::default(),
            history_enabled: true,
            cleanup_interval: Duration::from_secs(300),
            max_body: DEFAULT_MAX_BODY,
        }
    }
}

impl From<&GatewayConfig> for EngineSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            pin_store: config.pin_store(),
            batcher: config.batcher(),
            history_enabled: config.history.enabled,
            cleanup_interval: config.cleanup_interval(),
            max_body: config.server.max_body_size,
        }
    }
}

/// Engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub pending_devices: usize,
    pub total_pending_writes: usize,
    pub active_devices: usize,
    pub total_pin_keys: usize,
    pub live_devices: usize,
    pub realtime_subscribers: usize,
}

// =============================================================================
// Runtime State
// =============================================================================

enum Runtime {
    Idle(FlushWorker),
    Running(Background),
    Stopped,
}

struct Background {
    flush: FlushWorkerHandle,
    shutdown_tx: mpsc::Sender<()>,
    maintenance: JoinHandle<()>,
}

// =============================================================================
// PinSync
// =============================================================================

/// The shared sync engine. Cheap to clone.
#[derive(Clone)]
pub struct PinSync {
    store: PinStore,
    batcher: Arc<WriteBackBatcher>,
    fanout: Arc<FanOut>,
    registry: Arc<ConnectionRegistry>,
    validator: TokenValidator,
    settings: EngineSettings,
    runtime: Arc<Mutex<Runtime>>,
}

impl PinSync {
    /// Creates an engine. Background tasks start with [`PinSync::start`].
    pub fn new(
        cache: Arc<dyn KvCache>,
        history: Arc<dyn PinHistoryStore>,
        devices: Arc<dyn DeviceRegistry>,
        settings: EngineSettings,
    ) -> Self {
        let (batcher, worker) = WriteBackBatcher::new(history, settings.batcher);

        PinSync {
            store: PinStore::new(cache, settings.pin_store),
            batcher,
            fanout: Arc::new(FanOut::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            validator: TokenValidator::new(devices),
            settings,
            runtime: Arc::new(Mutex::new(Runtime::Idle(worker))),
        }
    }

    pub fn fanout(&self) -> &Arc<FanOut> {
        &self.fanout
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn batcher(&self) -> &Arc<WriteBackBatcher> {
        &self.batcher
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the flush worker and the maintenance loop.
    pub async fn start(&self) -> SyncResult<()> {
        let mut runtime = self.runtime.lock().await;
        let worker = match std::mem::replace(&mut *runtime, Runtime::Stopped) {
            Runtime::Idle(worker) => worker,
            other => {
                *runtime = other;
                return Err(SyncError::Internal("Sync engine already started".into()));
            }
        };

        let flush = worker.spawn();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let maintenance = tokio::spawn(self.clone().maintenance_loop(shutdown_rx));

        *runtime = Runtime::Running(Background {
            flush,
            shutdown_tx,
            maintenance,
        });

        info!(
            history = self.settings.history_enabled,
            "Sync engine started"
        );
        Ok(())
    }

    /// Stops the timers and drains pending history writes.
    ///
    /// Blocks for at most the configured shutdown timeout.
    pub async fn shutdown(&self) -> SyncResult<DrainReport> {
        let mut runtime = self.runtime.lock().await;
        let background = match std::mem::replace(&mut *runtime, Runtime::Stopped) {
            Runtime::Running(background) => background,
            Runtime::Idle(_) => {
                // Never started: drain inline
                let report = self.batcher.drain(self.settings.batcher.shutdown_timeout).await;
                return Ok(report);
            }
            Runtime::Stopped => return Err(SyncError::ShuttingDown),
        };

        info!("Shutting down sync engine");

        let _ = background.shutdown_tx.send(()).await;
        if let Err(e) = background.maintenance.await {
            warn!(?e, "Maintenance task ended abnormally");
        }

        let report = background.flush.shutdown().await?;
        info!(
            persisted = report.persisted,
            abandoned = report.abandoned,
            "Sync engine stopped"
        );
        Ok(report)
    }

    async fn maintenance_loop(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let cleanup_period = self.settings.cleanup_interval;
        let mut cleanup = interval_at(Instant::now() + cleanup_period, cleanup_period);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let retention_period = self.settings.batcher.retention_sweep_interval;
        let mut retention = interval_at(Instant::now() + retention_period, retention_period);
        retention.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cleanup.tick() => {
                    if let Err(e) = self.cleanup_idle_devices().await {
                        error!(error = %e, "Idle device sweep failed");
                    }
                }

                _ = retention.tick(), if self.settings.history_enabled => {
                    if let Err(e) = self.batcher.sweep_retention().await {
                        error!(error = %e, "History retention sweep failed");
                    }
                }

                _ = shutdown_rx.recv() => {
                    debug!("Maintenance loop shutting down");
                    break;
                }
            }
        }
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Returns the identity behind a valid device token.
    pub async fn authenticate(&self, raw_token: &str) -> Option<DeviceIdentity> {
        self.validator.validate(raw_token).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Writes a pin value on behalf of an external caller and broadcasts it.
    ///
    /// The value is cached, published to realtime subscribers, pushed to the
    /// device unless `exclude_device` is set, and queued for history.
    pub async fn set_pin_value_with_broadcast(
        &self,
        owner_id: &str,
        device_id: i64,
        pin: VirtualPin,
        value: &str,
        exclude_device: bool,
    ) -> SyncResult<()> {
        let identity = DeviceIdentity::new(owner_id, DEFAULT_DASHBOARD_ID, device_id);
        self.write(&identity, pin, value, exclude_device).await
    }

    /// Writes a value reported by the device itself.
    pub async fn record_device_write(
        &self,
        identity: &DeviceIdentity,
        pin: VirtualPin,
        value: &str,
    ) -> SyncResult<()> {
        self.write(identity, pin, value, true).await
    }

    async fn write(
        &self,
        identity: &DeviceIdentity,
        pin: VirtualPin,
        value: &str,
        exclude_device: bool,
    ) -> SyncResult<()> {
        let device_id = identity.device_id;

        let len = write_body(pin, value).len();
        if len > self.settings.max_body {
            return Err(SyncError::ValueTooLarge {
                len,
                max: self.settings.max_body,
            });
        }

        self.store.set_pin(device_id, pin, value).await?;
        self.fanout
            .publish(&identity.owner_id, device_id, pin, value);
        if !exclude_device {
            self.registry.push_virtual_write(device_id, pin, value);
        }
        if self.settings.history_enabled {
            self.batcher.enqueue(identity, pin, value);
        }

        debug!(device = %identity, pin = %pin.label(), "Pin write applied");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current value of a pin, if cached.
    pub async fn get_pin_value(&self, device_id: i64, pin: VirtualPin) -> Option<String> {
        self.store.get_pin(device_id, pin).await
    }

    /// Current value of a pin, or `"0"` if unknown.
    pub async fn read_pin(&self, device_id: i64, pin: VirtualPin) -> String {
        self.get_pin_value(device_id, pin)
            .await
            .unwrap_or_else(|| DEFAULT_PIN_VALUE.to_string())
    }

    /// Every cached pin of a device.
    pub async fn get_all_pins(&self, device_id: i64) -> BTreeMap<VirtualPin, String> {
        self.store.get_all_pins(device_id).await
    }

    // =========================================================================
    // Removal and Eviction
    // =========================================================================

    /// Removes one cached pin value.
    pub async fn delete_pin_value(&self, device_id: i64, pin: VirtualPin) -> SyncResult<bool> {
        Ok(self.store.delete_pin(device_id, pin).await?)
    }

    /// Removes every cached pin of a device and drops its queued writes.
    pub async fn delete_all_pins(&self, device_id: i64) -> SyncResult<u64> {
        let removed = self.store.delete_all_pins(device_id).await?;
        let discarded = self.batcher.discard_device(device_id);
        info!(device_id, removed, discarded, "Device pin state removed");
        Ok(removed)
    }

    /// Evicts idle devices along with their queued writes.
    pub async fn cleanup_idle_devices(&self) -> SyncResult<Vec<i64>> {
        let evicted = self
            .store
            .evict_idle(self.batcher.pending_device_ids())
            .await?;

        let discarded: usize = evicted
            .iter()
            .map(|id| self.batcher.discard_device(*id))
            .sum();
        if discarded > 0 {
            warn!(discarded, "Dropped queued writes of evicted devices");
        }
        Ok(evicted)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub async fn stats(&self) -> SyncResult<EngineStats> {
        let cache = self.store.stats().await?;
        let batcher = self.batcher.stats();
        Ok(EngineStats {
            pending_devices: batcher.pending_devices,
            total_pending_writes: batcher.pending_writes,
            active_devices: cache.active_devices,
            total_pin_keys: cache.pin_keys,
            live_devices: self.registry.len(),
            realtime_subscribers: self.fanout.subscriber_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticDeviceRegistry;
    use crate::cache::{activity_key, MemoryCache};
    use chrono::Utc;
    use pinhub_db::{Database, DbConfig};
    use uuid::Uuid;

    fn pin(n: u8) -> VirtualPin {
        VirtualPin::new(n).unwrap()
    }

    async fn engine(settings: EngineSettings) -> (Arc<MemoryCache>, Database, PinSync) {
        let cache = Arc::new(MemoryCache::new());
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sync = PinSync::new(
            cache.clone(),
            Arc::new(db.pin_history()),
            Arc::new(StaticDeviceRegistry::new()),
            settings,
        );
        (cache, db, sync)
    }

    #[tokio::test]
    async fn test_broadcast_write_reaches_all_sinks() {
        let (_cache, _db, sync) = engine(EngineSettings::default()).await;

        let subscriber = Uuid::new_v4();
        let (ws_tx, mut ws_rx) = mpsc::channel(4);
        sync.fanout().register(subscriber, ws_tx);
        sync.fanout().subscribe(subscriber, "user1", 7);

        let (dev_tx, mut dev_rx) = mpsc::channel(4);
        sync.registry()
            .bind(&DeviceIdentity::new("user1", 0, 7), Uuid::new_v4(), dev_tx);

        sync.set_pin_value_with_broadcast("user1", 7, pin(9), "42", false)
            .await
            .unwrap();

        assert_eq!(sync.get_pin_value(7, pin(9)).await.as_deref(), Some("42"));
        assert!(ws_rx.try_recv().unwrap().contains("\"V9\""));
        assert_eq!(dev_rx.try_recv().unwrap().body(), b"vw\09\042");
        assert_eq!(sync.batcher().pending_writes(), 1);
    }

    #[tokio::test]
    async fn test_device_write_is_not_echoed() {
        let (_cache, _db, sync) = engine(EngineSettings::default()).await;
        let identity = DeviceIdentity::new("user1", 100, 7);

        let (dev_tx, mut dev_rx) = mpsc::channel(4);
        sync.registry().bind(&identity, Uuid::new_v4(), dev_tx);

        sync.record_device_write(&identity, pin(1), "on").await.unwrap();
        assert!(dev_rx.try_recv().is_err());
        assert_eq!(sync.read_pin(7, pin(1)).await, "on");
        assert_eq!(sync.read_pin(7, pin(2)).await, "0");
    }

    #[tokio::test]
    async fn test_oversized_value_is_refused() {
        let settings = EngineSettings {
            max_body: 16,
            ..EngineSettings::default()
        };
        let (_cache, _db, sync) = engine(settings).await;
        let (dev_tx, mut dev_rx) = mpsc::channel(4);
        sync.registry()
            .bind(&DeviceIdentity::new("user1", 0, 7), Uuid::new_v4(), dev_tx);

        // "vw\01\0" is 5 bytes, leaving 11 for the value
        let err = sync
            .set_pin_value_with_broadcast("user1", 7, pin(1), &"x".repeat(12), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ValueTooLarge { len: 17, max: 16 }));
        assert_eq!(sync.get_pin_value(7, pin(1)).await, None);
        assert!(dev_rx.try_recv().is_err());
        assert_eq!(sync.batcher().pending_writes(), 0);

        let fits = "x".repeat(11);
        sync.set_pin_value_with_broadcast("user1", 7, pin(1), &fits, false)
            .await
            .unwrap();
        assert_eq!(dev_rx.try_recv().unwrap().body().len(), 16);
    }

    #[tokio::test]
    async fn test_history_disabled_skips_queue() {
        let settings = EngineSettings {
            history_enabled: false,
            ..EngineSettings::default()
        };
        let (_cache, _db, sync) = engine(settings).await;

        sync.set_pin_value_with_broadcast("user1", 7, pin(1), "x", true)
            .await
            .unwrap();
        assert_eq!(sync.batcher().pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_discards_pending_writes() {
        let (cache, _db, sync) = engine(EngineSettings::default()).await;
        sync.set_pin_value_with_broadcast("user1", 7, pin(1), "x", true)
            .await
            .unwrap();

        let stale = Utc::now().timestamp_millis() - 120_000;
        cache
            .set_with_ttl(&activity_key(7), &stale.to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(sync.cleanup_idle_devices().await.unwrap(), vec![7]);
        assert!(sync.get_all_pins(7).await.is_empty());
        assert_eq!(sync.batcher().pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_delete_all_pins() {
        let (_cache, _db, sync) = engine(EngineSettings::default()).await;
        sync.set_pin_value_with_broadcast("user1", 7, pin(1), "a", true)
            .await
            .unwrap();
        sync.set_pin_value_with_broadcast("user1", 7, pin(2), "b", true)
            .await
            .unwrap();

        assert_eq!(sync.delete_all_pins(7).await.unwrap(), 2);
        assert_eq!(sync.batcher().pending_writes(), 0);
        assert!(!sync.delete_pin_value(7, pin(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_persists_pending_writes() {
        let (_cache, db, sync) = engine(EngineSettings::default()).await;
        sync.start().await.unwrap();
        assert!(sync.start().await.is_err());

        for v in ["1", "2", "3"] {
            sync.set_pin_value_with_broadcast("user1", 7, pin(9), v, true)
                .await
                .unwrap();
        }

        let report = sync.shutdown().await.unwrap();
        assert_eq!(report.persisted, 3);
        assert_eq!(db.pin_history().count_for(7, "V9").await.unwrap(), 3);
        assert_eq!(
            db.pin_history().latest(7, "V9").await.unwrap().unwrap().value,
            "3"
        );
        assert!(matches!(sync.shutdown().await, Err(SyncError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_stats() {
        let (_cache, _db, sync) = engine(EngineSettings::default()).await;
        sync.set_pin_value_with_broadcast("user1", 7, pin(1), "a", true)
            .await
            .unwrap();
        sync.set_pin_value_with_broadcast("user1", 8, pin(1), "b", true)
            .await
            .unwrap();

        let stats = sync.stats().await.unwrap();
        assert_eq!(stats.pending_devices, 2);
        assert_eq!(stats.total_pending_writes, 2);
        assert_eq!(stats.active_devices, 2);
        assert_eq!(stats.total_pin_keys, 2);
        assert_eq!(stats.live_devices, 0);

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["totalPendingWrites"], 2);
    }
}
