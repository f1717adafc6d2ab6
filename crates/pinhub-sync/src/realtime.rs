//! # Realtime Server
//!
//! WebSocket endpoint for dashboards and apps that follow pin values live.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      RealtimeServer (Axum)                              │
//! │                                                                         │
//! │  /health ──▶ "OK"                                                      │
//! │  /ws     ──▶ WebSocket upgrade                                         │
//! │                   │                                                     │
//! │                   ▼                                                     │
//! │        ┌─────────────────────┐                                          │
//! │        │  connection task    │  subscribe / unsubscribe ──► FanOut     │
//! │        └──────────┬──────────┘                                          │
//! │                   │                                                     │
//! │     ┌─────────────┼──────────────┐                                      │
//! │     ▼             ▼              ▼                                      │
//! │  outgoing     fan-out         ping task                                 │
//! │  task         forwarder       (every 30s)                               │
//! │  (mpsc 64)    (JSON events)                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Message Flow:
//! 1. Client connects to `/ws`
//! 2. Client sends `{"cmd":"subscribe","userId":..,"deviceId":..}`
//! 3. Server replies `{"status":"ok","message":"subscribed"}`
//! 4. Every write to that device arrives as a `pin_update` event

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::interval_at;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::fanout::{ConnectionId, FanOut};
use crate::protocol::{ControlAction, ControlReply, MSG_SUBSCRIBED, MSG_UNSUBSCRIBED};

// =============================================================================
// Constants
// =============================================================================

/// Maximum inbound message size (64KB).
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Outbound queue depth per connection.
const OUTGOING_CAPACITY: usize = 64;

/// Pin update queue depth per connection.
const EVENT_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the realtime server.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Listen address, `host:port`. Port 0 picks a free port.
    pub bind_address: String,
    /// Ping interval.
    pub ping_interval: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig {
            bind_address: "0.0.0.0:8080".to_string(),
            ping_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

#[derive(Clone)]
struct RealtimeState {
    fanout: Arc<FanOut>,
    ping_interval: Duration,
}

/// The realtime WebSocket server.
pub struct RealtimeServer {
    config: RealtimeConfig,
    fanout: Arc<FanOut>,
}

/// Handle for controlling the realtime server.
#[derive(Clone)]
pub struct RealtimeHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl RealtimeHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shuts down the realtime server.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Realtime shutdown channel closed".into()))
    }
}

impl RealtimeServer {
    pub fn new(config: RealtimeConfig, fanout: Arc<FanOut>) -> Self {
        RealtimeServer { config, fanout }
    }

    /// Builds the router.
    fn router(&self) -> Router {
        let state = RealtimeState {
            fanout: self.fanout.clone(),
            ping_interval: self.config.ping_interval,
        };
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Starts the server and returns a handle.
    pub async fn start(self) -> SyncResult<RealtimeHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let app = self.router();

        let bind_addr = self.config.bind_address.clone();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SyncError::BindFailed {
                addr: bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "Realtime server started");

        tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Realtime server shutting down");
            })
            .await;
            if let Err(e) = result {
                warn!(error = %e, "Realtime server stopped with error");
            }
        });

        Ok(RealtimeHandle {
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RealtimeState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(addr = %addr, "Realtime connection upgrading");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Handles one realtime connection.
async fn handle_socket(socket: WebSocket, state: RealtimeState, addr: SocketAddr) {
    let connection: ConnectionId = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Pin updates from the fan-out
    let (event_tx, mut event_rx) = mpsc::channel::<String>(EVENT_CAPACITY);
    state.fanout.register(connection, event_tx);
    info!(%connection, addr = %addr, "Realtime client connected");

    // Outgoing message task
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_CAPACITY);
    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Fan-out forwarding task
    let outgoing_tx_events = outgoing_tx.clone();
    let forward_handle = tokio::spawn(async move {
        while let Some(json) = event_rx.recv().await {
            if outgoing_tx_events
                .send(Message::Text(json.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Ping task
    let outgoing_tx_ping = outgoing_tx.clone();
    let ping_interval = state.ping_interval;
    let ping_handle = tokio::spawn(async move {
        let mut ticker = interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
        loop {
            ticker.tick().await;
            if outgoing_tx_ping
                .send(Message::Ping(axum::body::Bytes::new()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Main receive loop
    loop {
        match receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    let reply = handle_control(&state.fanout, connection, text.as_str());
                    if !send_reply(&outgoing_tx, &reply).await {
                        break;
                    }
                }
                Message::Binary(data) => {
                    debug!(%connection, len = data.len(), "Ignoring binary message");
                }
                Message::Pong(_) => {
                    // Connection is alive
                }
                Message::Ping(data) => {
                    let _ = outgoing_tx.send(Message::Pong(data)).await;
                }
                Message::Close(_) => {
                    debug!(%connection, "Client requested close");
                    break;
                }
            },
            Some(Err(e)) => {
                let e = SyncError::from(e);
                warn!(%connection, error = %e, "Realtime connection error");
                break;
            }
            None => {
                break;
            }
        }
    }

    // Cleanup
    state.fanout.unregister(connection);
    ping_handle.abort();
    forward_handle.abort();
    outgoing_handle.abort();
    info!(%connection, addr = %addr, "Realtime client disconnected");
}

/// Applies one control message and builds the reply.
fn handle_control(fanout: &FanOut, connection: ConnectionId, text: &str) -> ControlReply {
    match ControlAction::parse(text) {
        Ok(ControlAction::Subscribe { user_id, device_id }) => {
            fanout.subscribe(connection, &user_id, device_id);
            info!(%connection, user_id = %user_id, device_id, "Subscribed");
            ControlReply::ok(MSG_SUBSCRIBED)
        }
        Ok(ControlAction::Unsubscribe { user_id, device_id }) => {
            fanout.unsubscribe(connection, &user_id, device_id);
            info!(%connection, user_id = %user_id, device_id, "Unsubscribed");
            ControlReply::ok(MSG_UNSUBSCRIBED)
        }
        Err(reply) => {
            warn!(%connection, message = %reply.message, "Rejected control message");
            reply
        }
    }
}

/// Queues a reply. Returns false once the connection is gone.
async fn send_reply(outgoing: &mpsc::Sender<Message>, reply: &ControlReply) -> bool {
    match serde_json::to_string(reply) {
        Ok(json) => outgoing.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize control reply");
            true
        }
    }
}
