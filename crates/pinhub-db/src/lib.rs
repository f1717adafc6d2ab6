//! # pinhub-db: Database Layer for the PinHub Gateway
//!
//! Durable storage for the gateway, using SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PinHub Data Flow                                 │
//! │                                                                         │
//! │  Write-back batcher / LOGIN handling (pinhub-sync)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     pinhub-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌──────────────────┐   ┌──────────────┐ │   │
//! │  │   │   Database    │    │  Repositories    │   │  Migrations  │ │   │
//! │  │   │   (pool.rs)   │    │                  │   │  (embedded)  │ │   │
//! │  │   │               │    │ PinHistoryRepo   │   │ 001_pin_...  │ │   │
//! │  │   │ SqlitePool    │◄───│ DeviceTokenRepo  │   │ 002_device_..│ │   │
//! │  │   └───────────────┘    └──────────────────┘   └──────────────┘ │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database (pinhub.db)                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Pin history and device token repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pinhub_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("pinhub.db")).await?;
//! let deleted = db.pin_history().delete_older_than_keep_latest(cutoff_ms).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig, DbLocation};

// Repository re-exports for convenience
pub use repository::device_token::{DeviceTokenRecord, DeviceTokenRepository};
pub use repository::pin_history::{NewPinSample, PinHistoryRepository, PinSample};
