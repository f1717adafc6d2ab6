//! Device activity records.
//!
//! Each touch stores the current epoch millis under the device's activity key
//! with a TTL equal to the eviction threshold. A device is active while its
//! record is younger than the active window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::cache::{activity_key, CacheResult, KvCache};

/// Tracks when each device was last seen.
#[derive(Clone)]
pub struct ActivityTracker {
    cache: Arc<dyn KvCache>,
    active_threshold: Duration,
    record_ttl: Duration,
}

impl ActivityTracker {
    pub fn new(cache: Arc<dyn KvCache>, active_threshold: Duration, record_ttl: Duration) -> Self {
        Self {
            cache,
            active_threshold,
            record_ttl,
        }
    }

    /// Records that the device was seen now.
    pub async fn touch(&self, device_id: i64) -> CacheResult<()> {
        let now = Utc::now().timestamp_millis().to_string();
        self.cache
            .set_with_ttl(&activity_key(device_id), &now, self.record_ttl)
            .await
    }

    /// Like [`touch`](Self::touch) but only logs failures.
    pub async fn touch_quietly(&self, device_id: i64) {
        if let Err(e) = self.touch(device_id).await {
            warn!(device_id, error = %e, "Failed to record device activity");
        }
    }

    /// Epoch millis of the last touch, if the record is still cached.
    pub async fn last_seen(&self, device_id: i64) -> CacheResult<Option<i64>> {
        let raw = self.cache.get(&activity_key(device_id)).await?;
        Ok(raw.and_then(|v| v.parse().ok()))
    }

    /// True if the device was touched within the active window.
    pub async fn is_active(&self, device_id: i64) -> CacheResult<bool> {
        Ok(self
            .last_seen(device_id)
            .await?
            .is_some_and(|seen| elapsed_ms(seen) < millis(self.active_threshold)))
    }
}

/// Milliseconds since `epoch_ms`, clamped at zero.
pub(crate) fn elapsed_ms(epoch_ms: i64) -> i64 {
    (Utc::now().timestamp_millis() - epoch_ms).max(0)
}

/// True once more than `threshold_ms` has passed since `seen_ms`.
pub(crate) fn idle_longer_than(seen_ms: i64, now_ms: i64, threshold_ms: i64) -> bool {
    now_ms.saturating_sub(seen_ms) > threshold_ms
}

pub(crate) fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    #[test]
    fn test_idle_only_past_threshold() {
        let now = 1_000_000;
        assert!(!idle_longer_than(now - 60_000, now, 60_000));
        assert!(idle_longer_than(now - 60_001, now, 60_000));
        assert!(!idle_longer_than(now - 59_999, now, 60_000));
        // Clock skew: a future last-seen is never idle
        assert!(!idle_longer_than(now + 5_000, now, 60_000));
    }

    fn tracker(cache: Arc<MemoryCache>) -> ActivityTracker {
        ActivityTracker::new(cache, Duration::from_secs(15), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_touch_marks_active() {
        let cache = Arc::new(MemoryCache::new());
        let tracker = tracker(cache.clone());

        assert!(!tracker.is_active(7).await.unwrap());
        tracker.touch(7).await.unwrap();
        assert!(tracker.is_active(7).await.unwrap());
        assert!(!tracker.is_active(8).await.unwrap());

        let ttl = cache.ttl(&activity_key(7)).unwrap();
        assert!(ttl > Duration::from_secs(59) && ttl <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_stale_record_is_inactive() {
        let cache = Arc::new(MemoryCache::new());
        let tracker = tracker(cache.clone());

        let stale = Utc::now().timestamp_millis() - 20_000;
        cache
            .set_with_ttl(&activity_key(7), &stale.to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(tracker.last_seen(7).await.unwrap(), Some(stale));
        assert!(!tracker.is_active(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_record_is_inactive() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .set_with_ttl(&activity_key(7), "yesterday", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!tracker(cache).is_active(7).await.unwrap());
    }
}
