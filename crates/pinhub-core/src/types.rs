//! # Domain Types
//!
//! Identity and pin types shared by every layer of the gateway.
//!
//! ```text
//! ┌─────────────────────────┐      ┌─────────────────────────┐
//! │    DeviceIdentity       │      │      VirtualPin         │
//! │  ─────────────────────  │      │  ─────────────────────  │
//! │  owner_id  (String)     │      │  0..128                 │
//! │  dashboard_id (i64)     │      │  wire: "9" or "V9"      │
//! │  device_id (i64)        │      │  storage: "V9"          │
//! └─────────────────────────┘      └─────────────────────────┘
//! ```
//!
//! `device_id` is the key of every shared store (pin cache, activity,
//! write-back queues, live connections). Owner and dashboard ride along for
//! persistence and subscription scoping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::protocol::PIN_COUNT;

// =============================================================================
// Device Identity
// =============================================================================

/// The (owner, dashboard, device) triple a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub owner_id: String,
    pub dashboard_id: i64,
    pub device_id: i64,
}

impl DeviceIdentity {
    pub fn new(owner_id: impl Into<String>, dashboard_id: i64, device_id: i64) -> Self {
        DeviceIdentity {
            owner_id: owner_id.into(),
            dashboard_id,
            device_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.owner_id, self.dashboard_id, self.device_id)
    }
}

// =============================================================================
// Virtual Pin
// =============================================================================

/// A virtual pin number in `0..128`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct VirtualPin(u8);

impl VirtualPin {
    /// Returns the pin if `index` is in range.
    pub fn new(index: u8) -> Option<Self> {
        (index < PIN_COUNT).then_some(VirtualPin(index))
    }

    /// Returns the numeric index.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Iterates over every valid pin.
    pub fn all() -> impl Iterator<Item = VirtualPin> {
        (0..PIN_COUNT).map(VirtualPin)
    }

    /// Returns the `V<n>` label used for storage and the realtime channel.
    pub fn label(self) -> String {
        format!("V{}", self.0)
    }
}

impl fmt::Display for VirtualPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a pin string is not a valid virtual pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPin(pub String);

impl fmt::Display for InvalidPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid virtual pin '{}'", self.0)
    }
}

impl std::error::Error for InvalidPin {}

/// Accepts `9`, `V9` and `v9`.
impl FromStr for VirtualPin {
    type Err = InvalidPin;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix('V')
            .or_else(|| s.strip_prefix('v'))
            .unwrap_or(s);
        digits
            .parse::<u8>()
            .ok()
            .and_then(VirtualPin::new)
            .ok_or_else(|| InvalidPin(s.to_string()))
    }
}

impl TryFrom<u8> for VirtualPin {
    type Error = InvalidPin;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        VirtualPin::new(index).ok_or_else(|| InvalidPin(index.to_string()))
    }
}

impl From<VirtualPin> for u8 {
    fn from(pin: VirtualPin) -> Self {
        pin.0
    }
}
