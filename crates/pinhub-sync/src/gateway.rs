//! Gateway assembly: engine, device listener and realtime listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::auth::DeviceRegistry;
use crate::batcher::{DrainReport, PinHistoryStore};
use crate::cache::{KvCache, MemoryCache, RedisCache};
use crate::config::GatewayConfig;
use crate::device_server::{DeviceServer, DeviceServerConfig, DeviceServerHandle};
use crate::error::SyncResult;
use crate::realtime::{RealtimeConfig, RealtimeHandle, RealtimeServer};
use crate::service::{EngineSettings, PinSync};
use crate::session::Dispatcher;

/// Opens the configured cache: Redis when a URL is set, memory otherwise.
pub async fn open_cache(config: &GatewayConfig) -> SyncResult<Arc<dyn KvCache>> {
    match config.cache.redis_url.as_deref() {
        Some(url) => Ok(Arc::new(RedisCache::connect(url).await?)),
        None => {
            info!("No Redis URL configured, using in-memory pin cache");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

/// A running gateway.
pub struct Gateway {
    sync: PinSync,
    device: DeviceServerHandle,
    realtime: RealtimeHandle,
}

impl Gateway {
    /// Starts the engine and both listeners.
    pub async fn start(
        config: &GatewayConfig,
        cache: Arc<dyn KvCache>,
        history: Arc<dyn PinHistoryStore>,
        devices: Arc<dyn DeviceRegistry>,
    ) -> SyncResult<Self> {
        let sync = PinSync::new(cache, history, devices, EngineSettings::from(config));
        sync.start().await?;

        let device = DeviceServer::new(
            DeviceServerConfig {
                bind_address: config.server.device_address(),
                max_body: config.server.max_body_size,
            },
            Dispatcher::new(sync.clone()),
        )
        .start()
        .await?;

        let realtime = RealtimeServer::new(
            RealtimeConfig {
                bind_address: config.server.realtime_address(),
                ping_interval: config.heartbeat_interval(),
            },
            sync.fanout().clone(),
        )
        .start()
        .await?;

        info!(
            device_addr = %device.local_addr(),
            realtime_addr = %realtime.local_addr(),
            "Gateway running"
        );

        Ok(Gateway {
            sync,
            device,
            realtime,
        })
    }

    pub fn sync(&self) -> &PinSync {
        &self.sync
    }

    pub fn device_addr(&self) -> SocketAddr {
        self.device.local_addr()
    }

    pub fn realtime_addr(&self) -> SocketAddr {
        self.realtime.local_addr()
    }

    /// Closes both listeners, then drains pending history.
    pub async fn shutdown(self) -> SyncResult<DrainReport> {
        self.device.shutdown();
        if let Err(e) = self.realtime.shutdown().await {
            tracing::warn!(error = %e, "Realtime server already stopped");
        }
        self.sync.shutdown().await
    }
}
