//! # Device Server
//!
//! TCP listener for hardware devices speaking the binary frame protocol.
//!
//! ## Connection Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        DeviceServer (TcpListener)                       │
//! │                                                                         │
//! │  accept ──► one task per connection                                    │
//! │                                                                         │
//! │   Framed<TcpStream, FrameCodec>                                         │
//! │      │ split                                                            │
//! │      ├── stream ──► Dispatcher::handle ──► reply ──┐                    │
//! │      │                                             ▼                    │
//! │      │                                  outbound mpsc(64) ◄── pushes   │
//! │      │                                             │      (registry)   │
//! │      └── sink ◄──── writer task ◄──────────────────┘                    │
//! │                                                                         │
//! │  Framing error or EOF ──► session closed, registry entry released      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use pinhub_core::{Frame, FrameCodec, FramingError};

use crate::error::{SyncError, SyncResult};
use crate::session::{Dispatcher, Session};

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// How long a closing connection may spend flushing queued frames.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Device listener settings.
#[derive(Debug, Clone)]
pub struct DeviceServerConfig {
    /// Listen address, `host:port`. Port 0 picks a free port.
    pub bind_address: String,
    /// Largest accepted frame body.
    pub max_body: usize,
}

impl Default for DeviceServerConfig {
    fn default() -> Self {
        DeviceServerConfig {
            bind_address: "0.0.0.0:8442".to_string(),
            max_body: pinhub_core::protocol::DEFAULT_MAX_BODY,
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Accepts device connections.
pub struct DeviceServer {
    config: DeviceServerConfig,
    dispatcher: Dispatcher,
}

/// Handle for a running device server.
#[derive(Clone)]
pub struct DeviceServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl DeviceServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl DeviceServer {
    pub fn new(config: DeviceServerConfig, dispatcher: Dispatcher) -> Self {
        DeviceServer { config, dispatcher }
    }

    /// Binds the listener and spawns the accept loop.
    pub async fn start(self) -> SyncResult<DeviceServerHandle> {
        let bind_addr = self.config.bind_address.clone();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| SyncError::BindFailed {
                addr: bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = DeviceServerHandle {
            local_addr,
            shutdown_tx: shutdown_tx.clone(),
        };

        info!(addr = %local_addr, "Device server started");
        tokio::spawn(self.accept_loop(listener, shutdown_tx));

        Ok(handle)
    }

    async fn accept_loop(self, listener: TcpListener, shutdown_tx: broadcast::Sender<()>) {
        let mut shutdown_rx = shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let _ = stream.set_nodelay(true);
                            let dispatcher = self.dispatcher.clone();
                            let max_body = self.config.max_body;
                            let conn_shutdown = shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                handle_connection(stream, addr, dispatcher, max_body, conn_shutdown)
                                    .await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept device connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Device server shutting down");
                    break;
                }
            }
        }
    }
}

// =============================================================================
// Connection Handler
// =============================================================================

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    dispatcher: Dispatcher,
    max_body: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let framed = Framed::new(stream, FrameCodec::with_max_body(max_body));
    let (mut sink, mut frames) = framed.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
    let mut session = Session::new(outbound_tx.clone());
    debug!(connection = %session.id(), addr = %addr, "Device connected");

    // Outgoing frame task
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            match sink.send(frame).await {
                Ok(()) => {}
                Err(FramingError::Io(e)) => {
                    debug!(error = %e, "Device write failed");
                    break;
                }
                // Nothing reached the buffer, the stream is still aligned
                Err(e) => warn!(error = %e, "Dropping unencodable frame"),
            }
        }
    });

    loop {
        tokio::select! {
            next = frames.next() => {
                match next {
                    Some(Ok(frame)) => {
                        debug!(connection = %session.id(), %frame, "Frame received");
                        if let Some(reply) = dispatcher.handle(&mut session, frame).await {
                            if outbound_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let e = SyncError::from(e);
                        warn!(connection = %session.id(), addr = %addr, error = %e, "Closing device connection");
                        break;
                    }
                    None => {
                        debug!(connection = %session.id(), addr = %addr, "Device closed connection");
                        break;
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }

    // Cleanup
    dispatcher.close(&mut session);
    drop(session);
    drop(outbound_tx);
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }
}
