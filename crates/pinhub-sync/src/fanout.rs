//! # Broadcast Fan-out
//!
//! Delivers pin updates to realtime clients subscribed to a device.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  subscribers:   ConnectionId ──► mpsc::Sender<String>  (JSON frames)   │
//! │  subscriptions: ConnectionId ──► {(owner_id, device_id), ...}          │
//! │                                                                         │
//! │  publish(owner, device, pin, value)                                     │
//! │     for each connection subscribed to (owner, device):                  │
//! │         try_send(json)   full / closed ──► logged, skipped              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use pinhub_core::VirtualPin;

use crate::protocol::PinUpdateEvent;

/// Identifies one live connection.
pub type ConnectionId = Uuid;

type Subscription = (String, i64);

/// Subscriber registry for realtime clients.
#[derive(Debug, Default)]
pub struct FanOut {
    subscribers: DashMap<ConnectionId, mpsc::Sender<String>>,
    subscriptions: DashMap<ConnectionId, HashSet<Subscription>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the outbound queue of a new connection.
    pub fn register(&self, connection: ConnectionId, sink: mpsc::Sender<String>) {
        self.subscribers.insert(connection, sink);
    }

    /// Drops a connection and all of its subscriptions.
    pub fn unregister(&self, connection: ConnectionId) {
        self.subscribers.remove(&connection);
        self.subscriptions.remove(&connection);
    }

    /// Subscribes a connection to a device. Idempotent.
    pub fn subscribe(&self, connection: ConnectionId, owner_id: &str, device_id: i64) {
        self.subscriptions
            .entry(connection)
            .or_default()
            .insert((owner_id.to_string(), device_id));
    }

    /// Removes one subscription. Idempotent; empty sets are pruned.
    pub fn unsubscribe(&self, connection: ConnectionId, owner_id: &str, device_id: i64) {
        if let Some(mut set) = self.subscriptions.get_mut(&connection) {
            set.remove(&(owner_id.to_string(), device_id));
        }
        self.subscriptions
            .remove_if(&connection, |_, set| set.is_empty());
    }

    /// True if the connection is subscribed to the device.
    pub fn is_subscribed(&self, connection: ConnectionId, owner_id: &str, device_id: i64) -> bool {
        self.subscriptions
            .get(&connection)
            .is_some_and(|set| set.contains(&(owner_id.to_string(), device_id)))
    }

    /// Pushes a pin update to every subscriber of (owner, device).
    ///
    /// ## Returns
    /// Number of connections the update was queued for.
    pub fn publish(&self, owner_id: &str, device_id: i64, pin: VirtualPin, value: &str) -> usize {
        let key = (owner_id.to_string(), device_id);
        let targets: Vec<ConnectionId> = self
            .subscriptions
            .iter()
            .filter(|e| e.value().contains(&key))
            .map(|e| *e.key())
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let event = PinUpdateEvent {
            device_id: device_id.to_string(),
            pin: pin.label(),
            value: value.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        let json = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize pin update");
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in targets {
            let Some(sink) = self.subscribers.get(&connection).map(|s| s.clone()) else {
                continue;
            };
            match sink.try_send(json.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%connection, device_id, "Subscriber queue full, update dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%connection, device_id, "Subscriber gone, update dropped");
                }
            }
        }

        debug!(device_id, pin = %pin.label(), delivered, "Pin update published");
        delivered
    }

    /// Number of connected realtime clients.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Number of subscriptions held by a connection.
    pub fn subscription_count(&self, connection: ConnectionId) -> usize {
        self.subscriptions
            .get(&connection)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(n: u8) -> VirtualPin {
        VirtualPin::new(n).unwrap()
    }

    fn client(fanout: &FanOut) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        fanout.register(id, tx);
        (id, rx)
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let fanout = FanOut::new();
        let (id, _rx) = client(&fanout);

        fanout.subscribe(id, "u1", 7);
        fanout.subscribe(id, "u1", 7);
        assert_eq!(fanout.subscription_count(id), 1);

        fanout.unsubscribe(id, "u1", 7);
        fanout.unsubscribe(id, "u1", 7);
        assert_eq!(fanout.subscription_count(id), 0);
        assert!(!fanout.is_subscribed(id, "u1", 7));
        // Empty set pruned
        assert!(fanout.subscriptions.get(&id).is_none());
    }

    #[test]
    fn test_publish_targets_owner_and_device() {
        let fanout = FanOut::new();
        let (a, mut rx_a) = client(&fanout);
        let (b, mut rx_b) = client(&fanout);
        let (_c, mut rx_c) = client(&fanout);

        fanout.subscribe(a, "u1", 7);
        fanout.subscribe(b, "u2", 7);

        assert_eq!(fanout.publish("u1", 7, pin(9), "42"), 1);

        let json = rx_a.try_recv().unwrap();
        let event: PinUpdateEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.device_id, "7");
        assert_eq!(event.pin, "V9");
        assert_eq!(event.value, "42");

        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_full_subscriber_does_not_block() {
        let fanout = FanOut::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);
        fanout.register(id, tx);
        fanout.subscribe(id, "u1", 7);

        assert_eq!(fanout.publish("u1", 7, pin(1), "a"), 1);
        assert_eq!(fanout.publish("u1", 7, pin(1), "b"), 0);
        assert!(rx.try_recv().unwrap().contains("\"a\""));
    }

    #[test]
    fn test_unregister_drops_subscriptions() {
        let fanout = FanOut::new();
        let (id, _rx) = client(&fanout);
        fanout.subscribe(id, "u1", 7);

        fanout.unregister(id);
        assert_eq!(fanout.subscriber_count(), 0);
        assert_eq!(fanout.publish("u1", 7, pin(1), "x"), 0);
    }
}
