//! # Pin State Store
//!
//! Latest value of every virtual pin, kept in the cache with an
//! activity-dependent TTL.
//!
//! ## TTL Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  set_pin(device, pin, value)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  device active (seen < active_threshold ago)?                          │
//! │       │ yes                         │ no                                │
//! │       ▼                             ▼                                   │
//! │  TTL = active_pin_ttl (24h)    TTL = cleanup_threshold (60s)           │
//! │       │                             │                                   │
//! │       └──────────────┬──────────────┘                                   │
//! │                      ▼                                                  │
//! │            SET pin key, then touch activity                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The TTL is chosen before the write touches activity, so the first write
//! after a quiet period is stored with the short TTL.
//!
//! ## Eviction
//! A sweep collects every device that has an activity record or a pin key
//! (plus any extra candidates the caller knows about) and evicts those whose
//! last activity is missing or older than `cleanup_threshold`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use pinhub_core::VirtualPin;

use crate::activity::{elapsed_ms, idle_longer_than, millis, ActivityTracker};
use crate::cache::{
    activity_key, device_id_from_key, device_pin_prefix, pin_key, CacheResult, KvCache,
    ACTIVITY_KEY_PREFIX, PIN_KEY_PREFIX,
};

/// Timing settings of the pin store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinStoreConfig {
    pub active_threshold: Duration,
    pub cleanup_threshold: Duration,
    pub active_pin_ttl: Duration,
}

impl Default for PinStoreConfig {
    fn default() -> Self {
        Self {
            active_threshold: Duration::from_secs(15),
            cleanup_threshold: Duration::from_secs(60),
            active_pin_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Cache-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub active_devices: usize,
    pub pin_keys: usize,
}

/// Latest-value store for virtual pins.
#[derive(Clone)]
pub struct PinStore {
    cache: Arc<dyn KvCache>,
    activity: ActivityTracker,
    config: PinStoreConfig,
}

impl PinStore {
    pub fn new(cache: Arc<dyn KvCache>, config: PinStoreConfig) -> Self {
        let activity =
            ActivityTracker::new(cache.clone(), config.active_threshold, config.cleanup_threshold);
        Self {
            cache,
            activity,
            config,
        }
    }

    pub fn activity(&self) -> &ActivityTracker {
        &self.activity
    }

    pub fn config(&self) -> &PinStoreConfig {
        &self.config
    }

    // =========================================================================
    // Reads and Writes
    // =========================================================================

    /// Stores the latest value of a pin.
    pub async fn set_pin(&self, device_id: i64, pin: VirtualPin, value: &str) -> CacheResult<()> {
        let ttl = if self.activity.is_active(device_id).await? {
            self.config.active_pin_ttl
        } else {
            self.config.cleanup_threshold
        };

        self.cache
            .set_with_ttl(&pin_key(device_id, pin), value, ttl)
            .await?;
        self.activity.touch(device_id).await?;

        debug!(device_id, pin = %pin.label(), ttl_secs = ttl.as_secs(), "Pin value cached");
        Ok(())
    }

    /// Returns the cached value of a pin. Cache failures read as absent.
    pub async fn get_pin(&self, device_id: i64, pin: VirtualPin) -> Option<String> {
        self.activity.touch_quietly(device_id).await;
        match self.cache.get(&pin_key(device_id, pin)).await {
            Ok(value) => value,
            Err(e) => {
                warn!(device_id, pin = %pin.label(), error = %e, "Pin read failed");
                None
            }
        }
    }

    /// Returns every cached pin of a device. Absent pins are omitted.
    pub async fn get_all_pins(&self, device_id: i64) -> BTreeMap<VirtualPin, String> {
        self.activity.touch_quietly(device_id).await;

        let pins: Vec<VirtualPin> = VirtualPin::all().collect();
        let keys: Vec<String> = pins.iter().map(|p| pin_key(device_id, *p)).collect();

        match self.cache.get_many(&keys).await {
            Ok(values) => pins
                .into_iter()
                .zip(values)
                .filter_map(|(pin, value)| value.map(|v| (pin, v)))
                .collect(),
            Err(e) => {
                warn!(device_id, error = %e, "Bulk pin read failed");
                BTreeMap::new()
            }
        }
    }

    /// Removes one pin value.
    pub async fn delete_pin(&self, device_id: i64, pin: VirtualPin) -> CacheResult<bool> {
        Ok(self.cache.delete(&[pin_key(device_id, pin)]).await? > 0)
    }

    /// Removes every pin value of a device.
    pub async fn delete_all_pins(&self, device_id: i64) -> CacheResult<u64> {
        self.cache.delete_prefix(&device_pin_prefix(device_id)).await
    }

    /// Removes every pin value and the activity record of a device.
    pub async fn forget_device(&self, device_id: i64) -> CacheResult<u64> {
        let pins = self.delete_all_pins(device_id).await?;
        self.cache.delete(&[activity_key(device_id)]).await?;
        Ok(pins)
    }

    // =========================================================================
    // Eviction
    // =========================================================================

    /// Evicts idle devices and returns their ids.
    ///
    /// `extra` adds candidates that may have neither pins nor activity, such
    /// as devices that only have queued history writes.
    pub async fn evict_idle(
        &self,
        extra: impl IntoIterator<Item = i64>,
    ) -> CacheResult<Vec<i64>> {
        let mut candidates: BTreeSet<i64> = extra.into_iter().collect();
        for prefix in [ACTIVITY_KEY_PREFIX, PIN_KEY_PREFIX] {
            for key in self.cache.keys_with_prefix(prefix).await? {
                if let Some(id) = device_id_from_key(&key) {
                    candidates.insert(id);
                }
            }
        }

        let threshold = millis(self.config.cleanup_threshold);
        let now = chrono::Utc::now().timestamp_millis();
        let mut evicted = Vec::new();
        for device_id in candidates {
            let idle = match self.activity.last_seen(device_id).await? {
                Some(seen) => idle_longer_than(seen, now, threshold),
                None => true,
            };
            if idle {
                let removed = self.forget_device(device_id).await?;
                debug!(device_id, removed, "Evicted idle device");
                evicted.push(device_id);
            }
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Idle devices evicted from pin cache");
        }
        Ok(evicted)
    }

    /// Counts active devices and cached pin keys.
    pub async fn stats(&self) -> CacheResult<CacheStats> {
        let threshold = millis(self.config.active_threshold);
        let activity_keys = self.cache.keys_with_prefix(ACTIVITY_KEY_PREFIX).await?;
        let seen = self.cache.get_many(&activity_keys).await?;
        let active_devices = seen
            .into_iter()
            .flatten()
            .filter_map(|v| v.parse::<i64>().ok())
            .filter(|ms| elapsed_ms(*ms) < threshold)
            .count();

        let pin_keys = self.cache.keys_with_prefix(PIN_KEY_PREFIX).await?.len();
        Ok(CacheStats {
            active_devices,
            pin_keys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::Utc;

    fn pin(n: u8) -> VirtualPin {
        VirtualPin::new(n).unwrap()
    }

    fn store() -> (Arc<MemoryCache>, PinStore) {
        let cache = Arc::new(MemoryCache::new());
        (cache.clone(), PinStore::new(cache, PinStoreConfig::default()))
    }

    async fn backdate(cache: &MemoryCache, device_id: i64, ago_ms: i64) {
        let ts = Utc::now().timestamp_millis() - ago_ms;
        cache
            .set_with_ttl(&activity_key(device_id), &ts.to_string(), Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_write_uses_short_ttl() {
        let (cache, store) = store();
        store.set_pin(7, pin(9), "42").await.unwrap();

        let ttl = cache.ttl(&pin_key(7, pin(9))).unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(store.activity().is_active(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_active_device_gets_long_ttl() {
        let (cache, store) = store();
        store.set_pin(7, pin(9), "1").await.unwrap();
        store.set_pin(7, pin(9), "2").await.unwrap();

        let ttl = cache.ttl(&pin_key(7, pin(9))).unwrap();
        assert!(ttl > Duration::from_secs(3600));
        assert_eq!(store.get_pin(7, pin(9)).await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_get_all_pins_is_sparse() {
        let (_cache, store) = store();
        store.set_pin(7, pin(0), "a").await.unwrap();
        store.set_pin(7, pin(127), "b").await.unwrap();
        store.set_pin(8, pin(1), "other").await.unwrap();

        let pins = store.get_all_pins(7).await;
        assert_eq!(pins.len(), 2);
        assert_eq!(pins.get(&pin(0)).map(String::as_str), Some("a"));
        assert_eq!(pins.get(&pin(127)).map(String::as_str), Some("b"));

        assert!(store.get_all_pins(99).await.is_empty());
    }

    #[tokio::test]
    async fn test_read_touches_activity() {
        let (_cache, store) = store();
        assert!(!store.activity().is_active(7).await.unwrap());
        assert_eq!(store.get_pin(7, pin(1)).await, None);
        assert!(store.activity().is_active(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_pins_scoped_to_device() {
        let (_cache, store) = store();
        store.set_pin(7, pin(1), "a").await.unwrap();
        store.set_pin(7, pin(2), "b").await.unwrap();
        store.set_pin(70, pin(1), "c").await.unwrap();

        assert_eq!(store.delete_all_pins(7).await.unwrap(), 2);
        assert!(store.get_all_pins(7).await.is_empty());
        assert_eq!(store.get_pin(70, pin(1)).await.as_deref(), Some("c"));
        assert!(store.delete_pin(70, pin(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_evict_idle_devices() {
        let (cache, store) = store();
        store.set_pin(1, pin(1), "fresh").await.unwrap();
        store.set_pin(2, pin(1), "stale").await.unwrap();
        backdate(&cache, 2, 61_000).await;

        // Pin without any activity record
        cache
            .set_with_ttl(&pin_key(3, pin(4)), "orphan", Duration::from_secs(600))
            .await
            .unwrap();

        let mut evicted = store.evict_idle([4]).await.unwrap();
        evicted.sort();
        assert_eq!(evicted, vec![2, 3, 4]);

        assert_eq!(cache.get(&pin_key(1, pin(1))).await.unwrap().as_deref(), Some("fresh"));
        assert_eq!(cache.get(&pin_key(2, pin(1))).await.unwrap(), None);
        assert_eq!(cache.get(&activity_key(2)).await.unwrap(), None);
        assert_eq!(cache.get(&pin_key(3, pin(4))).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recently_idle_device_survives_sweep() {
        let (cache, store) = store();
        store.set_pin(5, pin(1), "v").await.unwrap();
        backdate(&cache, 5, 30_000).await;

        assert!(store.evict_idle([]).await.unwrap().is_empty());
        assert!(!store.activity().is_active(5).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats() {
        let (cache, store) = store();
        store.set_pin(1, pin(1), "a").await.unwrap();
        store.set_pin(1, pin(2), "b").await.unwrap();
        store.set_pin(2, pin(1), "c").await.unwrap();
        backdate(&cache, 2, 20_000).await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.active_devices, 1);
        assert_eq!(stats.pin_keys, 3);
    }
}
