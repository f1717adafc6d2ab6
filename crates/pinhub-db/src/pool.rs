//! # Database Handle
//!
//! Opens the gateway's SQLite store and hands out repositories.
//!
//! ## Writers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            SqlitePool                                   │
//! │                                                                         │
//! │  flush pass ─────────► pin_history INSERT      (one row per write)     │
//! │  retention sweep ────► pin_history DELETE      (keep latest per pin)   │
//! │  LOGIN ──────────────► device_tokens SELECT                            │
//! │  provision ──────────► device_tokens UPSERT                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A file database runs in WAL mode so token lookups never wait behind a
//! flush pass. Writers that collide wait up to `busy_timeout` instead of
//! failing with `SQLITE_BUSY`.
//!
//! An in-memory database lives exactly as long as its single connection,
//! so that connection is never reaped.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::device_token::DeviceTokenRepository;
use crate::repository::pin_history::PinHistoryRepository;

/// Default pool size for a file database.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default wait for a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

/// Database configuration.
///
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/pinhub/pinhub.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub location: DbLocation,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl DbConfig {
    /// File database, created on first open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            location: DbLocation::File(path.into()),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Private in-memory database on a single connection.
    pub fn in_memory() -> Self {
        DbConfig {
            location: DbLocation::Memory,
            max_connections: 1,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Pool size. Ignored for in-memory databases.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = match &self.location {
            DbLocation::File(path) => SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
            // Each parse names a new private database
            DbLocation::Memory => SqliteConnectOptions::from_str("sqlite::memory:")?,
        };
        Ok(options.foreign_keys(true).busy_timeout(self.busy_timeout))
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        match self.location {
            DbLocation::File(_) => SqlitePoolOptions::new().max_connections(self.max_connections),
            DbLocation::Memory => SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
        }
    }
}

impl std::fmt::Display for DbLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbLocation::File(path) => write!(f, "{}", path.display()),
            DbLocation::Memory => f.write_str(":memory:"),
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to the gateway store.
///
/// Cheap to clone; repositories are created per call and share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database and brings its schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        let pool = config
            .pool_options()
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(format!("{}: {}", config.location, e)))?;

        migrations::run_migrations(&pool).await?;

        info!(
            location = %config.location,
            max_connections = config.max_connections,
            "Database opened"
        );
        Ok(Database { pool })
    }

    pub fn pin_history(&self) -> PinHistoryRepository {
        PinHistoryRepository::new(self.pool.clone())
    }

    pub fn device_tokens(&self) -> DeviceTokenRepository {
        DeviceTokenRepository::new(self.pool.clone())
    }

    /// Waits for in-flight queries, then closes every connection.
    pub async fn close(&self) {
        info!("Closing database");
        self.pool.close().await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
