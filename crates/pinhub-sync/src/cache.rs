//! # Key/Value Cache
//!
//! Latest pin values and device activity records live in a TTL cache.
//!
//! ## Key Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  pin:{device_id}:V{pin}        latest value of one virtual pin         │
//! │  device:activity:{device_id}   epoch millis of the last touch          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Backends
//! - [`RedisCache`]: shared cache through a reconnecting connection manager
//! - [`MemoryCache`]: process-local map with lazy expiry, used when no Redis
//!   URL is configured and in tests

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use pinhub_core::VirtualPin;

/// Prefix of every pin key.
pub const PIN_KEY_PREFIX: &str = "pin:";

/// Prefix of every activity key.
pub const ACTIVITY_KEY_PREFIX: &str = "device:activity:";

/// Returns the cache key of one device pin.
pub fn pin_key(device_id: i64, pin: VirtualPin) -> String {
    format!("{}{}:{}", PIN_KEY_PREFIX, device_id, pin.label())
}

/// Returns the prefix shared by all pin keys of a device.
pub fn device_pin_prefix(device_id: i64) -> String {
    format!("{}{}:", PIN_KEY_PREFIX, device_id)
}

/// Returns the activity key of a device.
pub fn activity_key(device_id: i64) -> String {
    format!("{}{}", ACTIVITY_KEY_PREFIX, device_id)
}

/// Extracts the device id from a pin or activity key.
pub fn device_id_from_key(key: &str) -> Option<i64> {
    if let Some(rest) = key.strip_prefix(ACTIVITY_KEY_PREFIX) {
        return rest.parse().ok();
    }
    key.strip_prefix(PIN_KEY_PREFIX)?
        .split(':')
        .next()?
        .parse()
        .ok()
}

// =============================================================================
// Errors
// =============================================================================

/// Cache backend failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// Cache Trait
// =============================================================================

/// Minimal TTL key/value surface the pin store needs.
#[async_trait]
pub trait KvCache: Send + Sync + 'static {
    /// Reads one key.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Reads many keys in one round trip. The result is aligned with `keys`.
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>>;

    /// Writes a key with a TTL. Sub-second TTLs round up to one second.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Resets the TTL of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Deletes keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> CacheResult<u64>;

    /// Lists live keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>>;

    /// Deletes every key starting with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let keys = self.keys_with_prefix(prefix).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.delete(&keys).await
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

// =============================================================================
// Redis Backend
// =============================================================================

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
}

impl RedisCache {
    /// Connects to `redis_url`.
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        info!("Connected to Redis pin cache");
        Ok(Self { redis })
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let values: Vec<Option<String>> =
            redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.redis.clone();
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        let applied: bool = conn.expire(key, secs).await?;
        Ok(applied)
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.redis.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut results = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await?;
            cursor = next_cursor;
            results.extend(keys);
            if cursor == 0 {
                break;
            }
        }
        // SCAN may return a key more than once
        results.sort();
        results.dedup();
        Ok(results)
    }
}

// =============================================================================
// In-Memory Backend
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-local cache with the same TTL semantics as Redis.
///
/// Expired entries are dropped lazily when touched or listed. Time follows
/// the tokio clock, so paused-time tests can advance expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }

    fn read(&self, key: &str, now: Instant) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
        }
        None
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        Ok(self.read(key, Instant::now()))
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let now = Instant::now();
        Ok(keys.iter().map(|k| self.read(k, now)).collect())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs(ttl));
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = now + Duration::from_secs(ttl_secs(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        self.entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        debug!(prefix, count = keys.len(), "Scanned memory cache");
        Ok(keys)
    }
}
