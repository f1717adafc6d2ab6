//! # Error Types
//!
//! Protocol-level error types for pinhub-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Protocol Errors                                  │
//! │                                                                         │
//! │  FramingError  ── fatal: the byte stream can no longer be trusted,     │
//! │                   the connection is closed                             │
//! │                                                                         │
//! │  TokenError    ── a login token could not be parsed; answered with     │
//! │                   INVALID_TOKEN, the session stays open                │
//! │                                                                         │
//! │  CommandError  ── a single frame was rejected; answered with the       │
//! │                   status from `CommandError::status()`                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::protocol::StatusCode;

// =============================================================================
// Framing Error
// =============================================================================

/// Connection-fatal errors raised by the frame codec.
#[derive(Debug, Error)]
pub enum FramingError {
    /// A body, inbound or outbound, is larger than the configured maximum.
    #[error("Frame body of {declared} bytes exceeds maximum of {max}")]
    BodyTooLarge { declared: usize, max: usize },

    /// An outbound body cannot be described by the 16-bit length field.
    #[error("Frame body of {0} bytes cannot be encoded")]
    BodyUnencodable(usize),

    /// RESPONSE frames carry a status in place of a length.
    #[error("RESPONSE frames cannot carry a body")]
    ResponseWithBody,

    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Token Error
// =============================================================================

/// Reasons a device token string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token is empty")]
    Empty,

    /// Fewer than four `-` separated segments.
    #[error("Token has {0} segments, expected at least 4")]
    TooFewSegments(usize),

    #[error("Token segment '{segment}' is not a valid {field}")]
    InvalidNumber { field: &'static str, segment: String },

    #[error("Token secret is empty")]
    EmptySecret,

    #[error("Token owner is empty")]
    EmptyOwner,
}

// =============================================================================
// Command Error
// =============================================================================

/// A recoverable per-frame failure.
///
/// Every variant maps to exactly one wire status; the message id of the
/// offending frame is echoed back by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Session is not authenticated")]
    NotAuthenticated,

    #[error("Invalid device token")]
    InvalidToken,

    #[error("Illegal command: {0}")]
    IllegalCommand(String),

    #[error("Illegal command body: {0}")]
    IllegalBody(String),

    #[error("Command not allowed: {0}")]
    NotAllowed(String),

    /// Internal failure while handling a well-formed frame.
    #[error("Server exception: {0}")]
    ServerException(String),
}

impl CommandError {
    /// Returns the wire status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            CommandError::NotAuthenticated => StatusCode::NotAuthenticated,
            CommandError::InvalidToken => StatusCode::InvalidToken,
            CommandError::IllegalCommand(_) => StatusCode::IllegalCommand,
            CommandError::IllegalBody(_) => StatusCode::IllegalCommandBody,
            CommandError::NotAllowed(_) => StatusCode::NotAllowed,
            CommandError::ServerException(_) => StatusCode::ServerException,
        }
    }
}

impl From<TokenError> for CommandError {
    fn from(_: TokenError) -> Self {
        CommandError::InvalidToken
    }
}
