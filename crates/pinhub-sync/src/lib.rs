//! # pinhub-sync: Pin Synchronization Engine
//!
//! This crate owns every connection, shared store and background task of the
//! gateway: devices speak the binary frame protocol over TCP, dashboards
//! follow pin values over WebSocket, and every write is cached, broadcast
//! and queued for durable history.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Gateway Architecture                           │
//! │                                                                         │
//! │  ┌────────────────┐                         ┌────────────────────────┐  │
//! │  │  DeviceServer  │  frames                 │   RealtimeServer       │  │
//! │  │  TCP + Framed  │──────┐           ┌─────►│   axum /ws, /health    │  │
//! │  └────────────────┘      ▼           │      └────────────────────────┘  │
//! │                   ┌──────────────┐   │ pin_update                       │
//! │                   │  Dispatcher  │   │                                  │
//! │                   │  (session)   │   │                                  │
//! │                   └──────┬───────┘   │                                  │
//! │                          ▼           │                                  │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         PinSync                                  │  │
//! │  │                                                                  │  │
//! │  │  PinStore ──► KvCache (Redis | memory)   ActivityTracker         │  │
//! │  │  FanOut ──► realtime subscribers                                 │  │
//! │  │  ConnectionRegistry ──► out-of-band pushes to live devices      │  │
//! │  │  WriteBackBatcher ──► FlushWorker ──► PinHistoryStore (SQLite)  │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`service`] - `PinSync` orchestrator and background tasks
//! - [`pin_store`] - Latest pin values with activity-based TTLs
//! - [`activity`] - Device last-seen records
//! - [`batcher`] - Write-back queue and flush worker
//! - [`fanout`] - Realtime subscriber registry
//! - [`registry`] - Live device connections
//! - [`auth`] - Device token validation
//! - [`cache`] - Cache abstraction (Redis, in-memory)
//!
//! ### Transport
//! - [`session`] - Device session state and command dispatch
//! - [`device_server`] - TCP listener for devices
//! - [`realtime`] - WebSocket listener for dashboards
//! - [`protocol`] - Realtime JSON messages
//! - [`gateway`] - Assembles everything
//!
//! ### Support
//! - [`config`] - Gateway configuration
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pinhub_db::Database;
//! use pinhub_sync::{gateway, Gateway, GatewayConfig};
//!
//! let config = GatewayConfig::load(None)?;
//! let db = Database::new(config.database()).await?;
//! let cache = gateway::open_cache(&config).await?;
//! let gateway = Gateway::start(
//!     &config,
//!     cache,
//!     Arc::new(db.pin_history()),
//!     Arc::new(db.device_tokens()),
//! )
//! .await?;
//!
//! // Writes from outside the device protocol
//! gateway
//!     .sync()
//!     .set_pin_value_with_broadcast("user1", 7, pin, "42", false)
//!     .await?;
//!
//! gateway.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Engine
pub mod activity;
pub mod auth;
pub mod batcher;
pub mod cache;
pub mod fanout;
pub mod pin_store;
pub mod registry;
pub mod service;

// Transport
pub mod device_server;
pub mod gateway;
pub mod protocol;
pub mod realtime;
pub mod session;

// Support
pub mod config;
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{DeviceRegistry, StaticDeviceRegistry, TokenValidator};
pub use batcher::{BatcherConfig, DrainReport, PinHistoryStore, WriteBackBatcher};
pub use cache::{CacheError, KvCache, MemoryCache, RedisCache};
pub use config::GatewayConfig;
pub use error::{SyncError, SyncResult};
pub use fanout::{ConnectionId, FanOut};
pub use gateway::Gateway;
pub use pin_store::{PinStore, PinStoreConfig};
pub use registry::ConnectionRegistry;
pub use service::{EngineSettings, EngineStats, PinSync};
pub use session::{Dispatcher, Session, SessionState};
