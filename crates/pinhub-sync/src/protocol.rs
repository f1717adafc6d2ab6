//! # Realtime Protocol Messages
//!
//! JSON messages exchanged with realtime (WebSocket) clients.
//!
//! ## Message Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Realtime Control Channel                           │
//! │                                                                         │
//! │  CLIENT ───► { "cmd": "subscribe",   "userId": "u1", "deviceId": 7 }   │
//! │  SERVER ◄─── { "status": "ok", "message": "subscribed" }               │
//! │                                                                         │
//! │  CLIENT ───► { "cmd": "unsubscribe", "userId": "u1", "deviceId": "7" } │
//! │  SERVER ◄─── { "status": "ok", "message": "unsubscribed" }             │
//! │                                                                         │
//! │  CLIENT ───► { "cmd": "reboot" }                                        │
//! │  SERVER ◄─── { "status": "error", "message": "unknown command" }       │
//! │                                                                         │
//! │  PUSH (every write to a subscribed device)                             │
//! │  SERVER ───► { "type": "pin_update", "deviceId": "7", "pin": "V9",     │
//! │                "value": "42", "timestamp": 1718000000000 }             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `deviceId` is accepted as a JSON number or a numeric string. Error
//! replies carry fixed messages only.

use serde::{Deserialize, Serialize};

pub const MSG_SUBSCRIBED: &str = "subscribed";
pub const MSG_UNSUBSCRIBED: &str = "unsubscribed";
pub const MSG_UNKNOWN_COMMAND: &str = "unknown command";
pub const MSG_INVALID_REQUEST: &str = "invalid request";

// =============================================================================
// Client Requests
// =============================================================================

/// Raw control request as sent by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<DeviceIdField>,
}

/// `deviceId` as either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DeviceIdField {
    Number(i64),
    Text(String),
}

impl DeviceIdField {
    pub fn as_device_id(&self) -> Option<i64> {
        match self {
            DeviceIdField::Number(n) => Some(*n),
            DeviceIdField::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// A validated control action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Subscribe { user_id: String, device_id: i64 },
    Unsubscribe { user_id: String, device_id: i64 },
}

impl ControlAction {
    /// Parses a text frame into an action, or the error reply to send.
    pub fn parse(text: &str) -> Result<Self, ControlReply> {
        let request: ControlRequest =
            serde_json::from_str(text).map_err(|_| ControlReply::error(MSG_INVALID_REQUEST))?;

        let subscribe = match request.cmd.as_deref() {
            Some("subscribe") => true,
            Some("unsubscribe") => false,
            _ => return Err(ControlReply::error(MSG_UNKNOWN_COMMAND)),
        };

        let user_id = request
            .user_id
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ControlReply::error(MSG_INVALID_REQUEST))?;
        let device_id = request
            .device_id
            .as_ref()
            .and_then(DeviceIdField::as_device_id)
            .ok_or_else(|| ControlReply::error(MSG_INVALID_REQUEST))?;

        Ok(if subscribe {
            ControlAction::Subscribe { user_id, device_id }
        } else {
            ControlAction::Unsubscribe { user_id, device_id }
        })
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Reply to a control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub status: ReplyStatus,
    pub message: String,
}

impl ControlReply {
    pub fn ok(message: &str) -> Self {
        ControlReply {
            status: ReplyStatus::Ok,
            message: message.to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        ControlReply {
            status: ReplyStatus::Error,
            message: message.to_string(),
        }
    }
}

/// Pin update pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "pin_update", rename_all = "camelCase")]
pub struct PinUpdateEvent {
    pub device_id: String,
    /// Pin label, `V<n>`.
    pub pin: String,
    pub value: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}
