//! # Gateway Configuration
//!
//! Configuration management for the gateway.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Load Order (later overrides earlier)                 │
//! │                                                                         │
//! │  1. Defaults (this module)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. gateway.toml                                                       │
//! │     (--config path, PINHUB_CONFIG, or the platform config dir)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. PINHUB_* environment variables                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  4. validate()                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # gateway.toml
//! [server]
//! bind_addr = "0.0.0.0"
//! device_port = 8442
//! realtime_port = 8080
//! max_body_size = 1024
//!
//! [cache]
//! redis_url = "redis://127.0.0.1:6379"   # omit for the in-memory cache
//! active_threshold_secs = 15
//! cleanup_threshold_secs = 60
//!
//! [history]
//! enabled = true
//! flush_interval_secs = 30
//! flush_threshold = 100
//! retention_days = 90
//!
//! [database]
//! path = "pinhub.db"
//! busy_timeout_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use pinhub_db::DbConfig;

use crate::batcher::BatcherConfig;
use crate::error::{SyncError, SyncResult};
use crate::pin_store::PinStoreConfig;

// =============================================================================
// Server Settings
// =============================================================================

/// Listener settings for the device and realtime servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address for both listeners (default: 0.0.0.0).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// TCP port for devices. 0 picks an ephemeral port.
    #[serde(default = "default_device_port")]
    pub device_port: u16,

    /// HTTP/WebSocket port for realtime clients. 0 picks an ephemeral port.
    #[serde(default = "default_realtime_port")]
    pub realtime_port: u16,

    /// Largest accepted frame body (bytes).
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Ping interval on realtime connections (seconds).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_device_port() -> u16 {
    8442
}

fn default_realtime_port() -> u16 {
    8080
}

fn default_max_body_size() -> usize {
    pinhub_core::protocol::DEFAULT_MAX_BODY
}

fn default_heartbeat_interval() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            device_port: default_device_port(),
            realtime_port: default_realtime_port(),
            max_body_size: default_max_body_size(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl ServerSettings {
    /// Returns the device listener address.
    pub fn device_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.device_port)
    }

    /// Returns the realtime listener address.
    pub fn realtime_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.realtime_port)
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Pin cache and device activity settings.
///
/// ## Activity Windows
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  last seen ──┬── 15s ────────┬── 60s ───────────────────────────────►   │
/// │              │   ACTIVE      │   IDLE            │ EVICTABLE            │
/// │              │ pin TTL 24h   │ pin TTL 60s       │ next sweep deletes   │
/// │              │               │                   │ pins + queue         │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Redis URL. When absent the gateway uses its in-memory cache.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// A device seen within this window is active (seconds).
    #[serde(default = "default_active_threshold")]
    pub active_threshold_secs: u64,

    /// A device unseen for this long is evicted (seconds). Also the TTL of
    /// activity records and of pins written while idle.
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold_secs: u64,

    /// TTL of pins written while the device is active (seconds).
    #[serde(default = "default_active_pin_ttl")]
    pub active_pin_ttl_secs: u64,

    /// Interval between eviction sweeps (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_active_threshold() -> u64 {
    15
}

fn default_cleanup_threshold() -> u64 {
    60
}

fn default_active_pin_ttl() -> u64 {
    86_400
}

fn default_cleanup_interval() -> u64 {
    300
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            redis_url: None,
            active_threshold_secs: default_active_threshold(),
            cleanup_threshold_secs: default_cleanup_threshold(),
            active_pin_ttl_secs: default_active_pin_ttl(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

// =============================================================================
// History Settings
// =============================================================================

/// Write-back batcher and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Persist pin writes at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Timer trigger for flush passes (seconds).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Pending-write count that triggers an immediate flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Most writes taken from one device per pass.
    #[serde(default = "default_per_device_cap")]
    pub per_device_cap: usize,

    /// Upper bound on the blocking flush at shutdown (seconds).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Samples older than this are deleted, except the newest per pin (days).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval between retention sweeps (seconds).
    #[serde(default = "default_retention_sweep_interval")]
    pub retention_sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_flush_interval() -> u64 {
    30
}

fn default_flush_threshold() -> usize {
    100
}

fn default_per_device_cap() -> usize {
    100
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    90
}

fn default_retention_sweep_interval() -> u64 {
    86_400
}

impl Default for HistorySettings {
    fn default() -> Self {
        HistorySettings {
            enabled: true,
            flush_interval_secs: default_flush_interval(),
            flush_threshold: default_flush_threshold(),
            per_device_cap: default_per_device_cap(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            retention_days: default_retention_days(),
            retention_sweep_interval_secs: default_retention_sweep_interval(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("pinhub.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

// =============================================================================
// Main Gateway Configuration
// =============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub history: HistorySettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl GatewayConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        let path = config_path
            .or_else(|| std::env::var("PINHUB_CONFIG").ok().map(PathBuf::from))
            .or_else(Self::default_config_path);

        if let Some(path) = path {
            if path.exists() {
                info!(?path, "Loading gateway config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(e.to_string()))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref raw) = self.cache.redis_url {
            let parsed = url::Url::parse(raw)?;
            if !matches!(parsed.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
                return Err(SyncError::InvalidUrl(format!(
                    "Redis URL must use redis://, rediss:// or unix://, got: {}",
                    raw
                )));
            }
        }

        if self.server.max_body_size == 0 || self.server.max_body_size > u16::MAX as usize {
            return Err(SyncError::InvalidConfig(format!(
                "max_body_size must be between 1 and {}",
                u16::MAX
            )));
        }

        if self.cache.active_threshold_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "active_threshold_secs must be greater than 0".into(),
            ));
        }

        if self.cache.cleanup_threshold_secs < self.cache.active_threshold_secs {
            return Err(SyncError::InvalidConfig(
                "cleanup_threshold_secs must not be shorter than active_threshold_secs".into(),
            ));
        }

        if self.cache.cleanup_interval_secs == 0 || self.server.heartbeat_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "interval settings must be greater than 0".into(),
            ));
        }

        if self.history.flush_interval_secs == 0
            || self.history.retention_sweep_interval_secs == 0
        {
            return Err(SyncError::InvalidConfig(
                "history intervals must be greater than 0".into(),
            ));
        }

        if self.history.flush_threshold == 0 || self.history.per_device_cap == 0 {
            return Err(SyncError::InvalidConfig(
                "flush_threshold and per_device_cap must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `PINHUB_*` overrides using `lookup` to read variables.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("PINHUB_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Some(port) = lookup("PINHUB_DEVICE_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding device port from environment");
                    self.server.device_port = p;
                }
                Err(_) => warn!(value = %port, "Ignoring invalid PINHUB_DEVICE_PORT"),
            }
        }

        if let Some(port) = lookup("PINHUB_REALTIME_PORT") {
            match port.parse::<u16>() {
                Ok(p) => {
                    debug!(port = p, "Overriding realtime port from environment");
                    self.server.realtime_port = p;
                }
                Err(_) => warn!(value = %port, "Ignoring invalid PINHUB_REALTIME_PORT"),
            }
        }

        if let Some(url) = lookup("PINHUB_REDIS_URL") {
            // An empty value forces the in-memory cache
            self.cache.redis_url = if url.is_empty() { None } else { Some(url) };
        }

        if let Some(path) = lookup("PINHUB_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(enabled) = lookup("PINHUB_HISTORY_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.history.enabled = true,
                "0" | "false" | "no" | "off" => self.history.enabled = false,
                _ => warn!(value = %enabled, "Ignoring invalid PINHUB_HISTORY_ENABLED"),
            }
        }

        if let Some(secs) = lookup("PINHUB_FLUSH_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.history.flush_interval_secs = s;
            }
        }

        if let Some(threshold) = lookup("PINHUB_FLUSH_THRESHOLD") {
            if let Ok(t) = threshold.parse::<usize>() {
                self.history.flush_threshold = t;
            }
        }

        if let Some(days) = lookup("PINHUB_RETENTION_DAYS") {
            if let Ok(d) = days.parse::<u32>() {
                self.history.retention_days = d;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "pinhub", "gateway")
            .map(|dirs| dirs.config_dir().join("gateway.toml"))
    }

    // =========================================================================
    // Component Settings
    // =========================================================================

    /// Settings for the pin store and activity tracker.
    pub fn pin_store(&self) -> PinStoreConfig {
        PinStoreConfig {
            active_threshold: Duration::from_secs(self.cache.active_threshold_secs),
            cleanup_threshold: Duration::from_secs(self.cache.cleanup_threshold_secs),
            active_pin_ttl: Duration::from_secs(self.cache.active_pin_ttl_secs),
        }
    }

    /// Settings for the write-back batcher.
    pub fn batcher(&self) -> BatcherConfig {
        BatcherConfig {
            flush_interval: Duration::from_secs(self.history.flush_interval_secs),
            flush_threshold: self.history.flush_threshold,
            per_device_cap: self.history.per_device_cap,
            shutdown_timeout: Duration::from_secs(self.history.shutdown_timeout_secs),
            retention: Duration::from_secs(u64::from(self.history.retention_days) * 86_400),
            retention_sweep_interval: Duration::from_secs(
                self.history.retention_sweep_interval_secs,
            ),
        }
    }

    /// Settings for the SQLite store.
    pub fn database(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// Interval between eviction sweeps.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache.cleanup_interval_secs)
    }

    /// Ping interval on realtime connections.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_interval_secs)
    }
}
