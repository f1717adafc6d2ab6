//! Live device connections.
//!
//! Maps a device id to the outbound queue of the connection currently
//! logged in as that device. A reconnect replaces the entry; a disconnect
//! only removes the entry if it still belongs to the closing connection.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use pinhub_core::hardware::write_body;
use pinhub_core::protocol::SERVER_MESSAGE_ID;
use pinhub_core::{DeviceIdentity, Frame, VirtualPin};

use crate::fanout::ConnectionId;

/// A device's live connection.
#[derive(Debug, Clone)]
pub struct DeviceLink {
    pub connection: ConnectionId,
    pub identity: DeviceIdentity,
    outbound: mpsc::Sender<Frame>,
}

/// Registry of device connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    devices: DashMap<i64, DeviceLink>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a device to a connection. The newest login wins.
    pub fn bind(
        &self,
        identity: &DeviceIdentity,
        connection: ConnectionId,
        outbound: mpsc::Sender<Frame>,
    ) {
        let link = DeviceLink {
            connection,
            identity: identity.clone(),
            outbound,
        };
        if let Some(previous) = self.devices.insert(identity.device_id, link) {
            if previous.connection != connection {
                info!(
                    device = %identity,
                    %connection,
                    replaced = %previous.connection,
                    "Device reconnected, replacing previous connection"
                );
            }
        }
    }

    /// Removes the device entry if it belongs to `connection`.
    pub fn release(&self, device_id: i64, connection: ConnectionId) -> bool {
        let removed = self
            .devices
            .remove_if(&device_id, |_, link| link.connection == connection)
            .is_some();
        if removed {
            debug!(device_id, %connection, "Device connection released");
        }
        removed
    }

    /// Pushes `vw pin value` to the device's live connection.
    ///
    /// Never blocks. Returns false if the device is offline or its queue is
    /// full; the push is dropped in both cases.
    pub fn push_virtual_write(&self, device_id: i64, pin: VirtualPin, value: &str) -> bool {
        let Some(outbound) = self.devices.get(&device_id).map(|l| l.outbound.clone()) else {
            debug!(device_id, "Device offline, push dropped");
            return false;
        };

        let frame = Frame::hardware(SERVER_MESSAGE_ID, write_body(pin, value));
        match outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(device_id, "Device outbound queue full, push dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(device_id, "Device connection closing, push dropped");
                false
            }
        }
    }

    /// Connection currently bound to a device.
    pub fn connection_of(&self, device_id: i64) -> Option<ConnectionId> {
        self.devices.get(&device_id).map(|l| l.connection)
    }

    pub fn is_online(&self, device_id: i64) -> bool {
        self.devices.contains_key(&device_id)
    }

    /// Number of live device connections.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinhub_core::Command;
    use uuid::Uuid;

    fn identity(device_id: i64) -> DeviceIdentity {
        DeviceIdentity::new("user1", 100, device_id)
    }

    #[test]
    fn test_push_reaches_bound_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.bind(&identity(7), Uuid::new_v4(), tx);

        assert!(registry.push_virtual_write(7, VirtualPin::new(9).unwrap(), "42"));

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.command(), Command::Hardware);
        assert_eq!(frame.message_id(), SERVER_MESSAGE_ID);
        assert_eq!(frame.body(), b"vw\09\042");
    }

    #[test]
    fn test_push_to_offline_device_is_dropped() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.push_virtual_write(7, VirtualPin::new(1).unwrap(), "x"));
    }

    #[test]
    fn test_stale_release_keeps_new_connection() {
        let registry = ConnectionRegistry::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let (tx_old, _rx_old) = mpsc::channel(4);
        let (tx_new, _rx_new) = mpsc::channel(4);

        registry.bind(&identity(7), old, tx_old);
        registry.bind(&identity(7), new, tx_new);

        assert!(!registry.release(7, old));
        assert_eq!(registry.connection_of(7), Some(new));

        assert!(registry.release(7, new));
        assert!(!registry.is_online(7));
    }

    #[test]
    fn test_full_queue_drops_push() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        registry.bind(&identity(7), Uuid::new_v4(), tx);

        let pin = VirtualPin::new(1).unwrap();
        assert!(registry.push_virtual_write(7, pin, "a"));
        assert!(!registry.push_virtual_write(7, pin, "b"));
    }
}
