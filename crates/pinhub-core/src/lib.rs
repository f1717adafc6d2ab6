//! # pinhub-core: Device Protocol for the PinHub Gateway
//!
//! This crate contains the wire-level logic of the Blynk-compatible device
//! protocol as pure code with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        PinHub Layering                                  │
//! │                                                                         │
//! │   device TCP socket                                                     │
//! │        │  bytes                                                         │
//! │        ▼                                                                │
//! │   ┌─────────────────────────────────────────────────────────────────┐  │
//! │   │                  pinhub-core (THIS CRATE)                       │  │
//! │   │                                                                 │  │
//! │   │   FrameCodec ──► Frame ──► HardwareCommand / DeviceToken        │  │
//! │   │                                                                 │  │
//! │   └─────────────────────────────────────────────────────────────────┘  │
//! │        │  typed frames                                                  │
//! │        ▼                                                                │
//! │   pinhub-sync: session dispatcher, pin store, batcher, fan-out         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Command and status tables, header constants
//! - [`frame`] - `Frame` and the `FrameCodec` decoder/encoder
//! - [`token`] - Device token parsing and canonical form
//! - [`hardware`] - HARDWARE body grammar (`vw` / `vr`)
//! - [`types`] - `DeviceIdentity`, `VirtualPin`
//! - [`error`] - Protocol error types
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::BytesMut;
//! use pinhub_core::{Frame, FrameCodec, HardwareCommand, StatusCode};
//! use tokio_util::codec::{Decoder, Encoder};
//!
//! let mut codec = FrameCodec::new();
//! let mut buf = BytesMut::new();
//! codec.encode(Frame::hardware(1, &b"vw\x009\x0042"[..]), &mut buf).unwrap();
//!
//! let frame = codec.decode(&mut buf).unwrap().unwrap();
//! let command = HardwareCommand::parse(frame.body()).unwrap();
//! assert_eq!(command.pin().index(), 9);
//!
//! let reply = Frame::response(frame.message_id(), StatusCode::Success);
//! assert_eq!(reply.status(), Some(StatusCode::Success));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod frame;
pub mod hardware;
pub mod protocol;
pub mod token;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CommandError, FramingError, TokenError};
pub use frame::{Frame, FrameCodec};
pub use hardware::{HardwareCommand, DEFAULT_PIN_VALUE};
pub use protocol::{Command, StatusCode};
pub use token::DeviceToken;
pub use types::{DeviceIdentity, VirtualPin};
