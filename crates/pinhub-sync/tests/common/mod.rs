//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use pinhub_core::{Command, DeviceIdentity, DeviceToken, Frame, FrameCodec};
use pinhub_db::{Database, DbConfig};
use pinhub_sync::{Gateway, GatewayConfig, MemoryCache};

pub const TOKEN: &str = "user1-100-7-abc123secretsecret";
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestGateway {
    pub gateway: Gateway,
    pub cache: Arc<MemoryCache>,
    pub db: Database,
}

/// Config bound to loopback with ephemeral ports.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.bind_addr = "127.0.0.1".into();
    config.server.device_port = 0;
    config.server.realtime_port = 0;
    config
}

/// Starts a gateway with an in-memory cache and database. `TOKEN` is on record.
pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let token = DeviceToken::parse(TOKEN).unwrap();
    db.device_tokens()
        .upsert_token(token.identity(), &token.canonical())
        .await
        .unwrap();

    let cache = Arc::new(MemoryCache::new());
    let gateway = Gateway::start(
        &config,
        cache.clone(),
        Arc::new(db.pin_history()),
        Arc::new(db.device_tokens()),
    )
    .await
    .unwrap();

    TestGateway { gateway, cache, db }
}

pub fn token_identity() -> DeviceIdentity {
    DeviceToken::parse(TOKEN).unwrap().into_identity()
}

// =============================================================================
// Device Client
// =============================================================================

pub struct DeviceClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl DeviceClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        DeviceClient {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    /// Next frame from the server, failing the test on timeout.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(IO_TIMEOUT, self.framed.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("framing error")
    }

    /// Sends a message and returns the reply.
    pub async fn request(&mut self, command: Command, message_id: u16, body: &[u8]) -> Frame {
        self.send(Frame::message(command, message_id, body.to_vec()))
            .await;
        self.recv().await
    }

    pub async fn login(&mut self, token: &str) -> Frame {
        self.request(Command::Login, 1, token.as_bytes()).await
    }

    /// True if the server closes the connection within the timeout.
    pub async fn is_closed_by_server(&mut self) -> bool {
        matches!(
            tokio::time::timeout(IO_TIMEOUT, self.framed.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }

    /// Writes raw bytes past the codec.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.framed.get_mut().write_all(bytes).await.unwrap();
    }
}

/// Polls `check` until it returns true or the timeout elapses.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + IO_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
