//! # Sync Error Types
//!
//! Error types for the synchronization engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SyncError                                     │
//! │                                                                         │
//! │  Configuration ── InvalidConfig, InvalidUrl, ConfigLoadFailed          │
//! │       → startup aborts                                                  │
//! │                                                                         │
//! │  Transport ────── BindFailed, ConnectionFailed, WebSocket               │
//! │       → listener: startup aborts; connection: that connection closes   │
//! │                                                                         │
//! │  Protocol ─────── Framing, SerializationFailed                         │
//! │       → connection closes                                               │
//! │                                                                         │
//! │  Writes ───────── ValueTooLarge                                        │
//! │       → write refused, nothing cached or pushed                        │
//! │                                                                         │
//! │  Cache ────────── CacheUnavailable                                     │
//! │       → reads degrade to "absent", writes answer SERVER_EXCEPTION      │
//! │                                                                         │
//! │  Persistence ──── DatabaseError                                        │
//! │       → batcher logs and skips the record                              │
//! │                                                                         │
//! │  Internal ─────── ShuttingDown, ChannelError, Internal                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::cache::CacheError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid gateway configuration.
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// Invalid cache URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// A listener could not be bound.
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    /// I/O failure on an established connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// The device byte stream violated the framing rules.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Failed to serialize an outbound message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Write Errors
    // =========================================================================
    /// A pin value would not fit in a device frame.
    #[error("Pin write of {len} bytes exceeds the {max} byte frame limit")]
    ValueTooLarge { len: usize, max: usize },

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Cache backend is unreachable or returned an error.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// Database query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The engine is shutting down.
    #[error("Gateway is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<pinhub_db::DbError> for SyncError {
    fn from(err: pinhub_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        SyncError::CacheUnavailable(err.to_string())
    }
}

impl From<pinhub_core::FramingError> for SyncError {
    fn from(err: pinhub_core::FramingError) -> Self {
        SyncError::Framing(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<axum::Error> for SyncError {
    fn from(err: axum::Error) -> Self {
        SyncError::WebSocketError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConnectionFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}
