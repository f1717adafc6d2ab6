//! # Write-back Batcher
//!
//! Queues pin writes per device and persists them from one dedicated worker.
//!
//! ## Flush Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        WriteBackBatcher                                 │
//! │                                                                         │
//! │  enqueue(write) ──► queues[device_id].push_back   (never blocks)        │
//! │       │             pending += 1                                        │
//! │       │                                                                 │
//! │       └── pending >= threshold? ── trigger.try_send(())  (cap 1)        │
//! │                                                                         │
//! │  FlushWorker (one task)                                                 │
//! │    select! {                                                            │
//! │      interval tick (first tick one interval after start)               │
//! │      trigger                                                            │
//! │      shutdown ──► drain until empty (bounded) ──► reply, exit          │
//! │    }                                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  flush(): CAS flushing false → true, else skip                         │
//! │    for each device:                                                     │
//! │      take up to per_device_cap writes (guard released)                 │
//! │      append one by one, ts = enqueued_at; failures logged, skipped     │
//! │      remove queue if drained                                            │
//! │    flushing = false                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use pinhub_core::{DeviceIdentity, VirtualPin};
use pinhub_db::{NewPinSample, PinHistoryRepository};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Persistence Seam
// =============================================================================

/// Durable sink for pin samples.
#[async_trait]
pub trait PinHistoryStore: Send + Sync + 'static {
    /// Persists one sample.
    async fn append(&self, sample: &NewPinSample) -> SyncResult<()>;

    /// Deletes samples older than `cutoff_ms`, keeping the newest sample of
    /// every (device, pin). Returns the number of deleted samples.
    async fn prune_keep_latest(&self, cutoff_ms: i64) -> SyncResult<u64>;
}

#[async_trait]
impl PinHistoryStore for PinHistoryRepository {
    async fn append(&self, sample: &NewPinSample) -> SyncResult<()> {
        self.insert(sample).await?;
        Ok(())
    }

    async fn prune_keep_latest(&self, cutoff_ms: i64) -> SyncResult<u64> {
        Ok(self.delete_older_than_keep_latest(cutoff_ms).await?)
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Batcher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    pub flush_interval: Duration,
    pub flush_threshold: usize,
    pub per_device_cap: usize,
    pub shutdown_timeout: Duration,
    pub retention: Duration,
    pub retention_sweep_interval: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            flush_threshold: 100,
            per_device_cap: 100,
            shutdown_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(90 * 86_400),
            retention_sweep_interval: Duration::from_secs(86_400),
        }
    }
}

// =============================================================================
// Pending Writes
// =============================================================================

/// A pin write waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub identity: DeviceIdentity,
    pub pin: VirtualPin,
    pub value: String,
    /// Epoch millis at enqueue time; persisted as the sample time.
    pub enqueued_at: i64,
}

impl PendingWrite {
    fn to_sample(&self) -> NewPinSample {
        NewPinSample {
            owner_id: self.identity.owner_id.clone(),
            dashboard_id: self.identity.dashboard_id,
            device_id: self.identity.device_id,
            pin: self.pin.label(),
            value: self.value.clone(),
            ts: self.enqueued_at,
        }
    }
}

/// Outcome of the blocking drain at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Writes persisted during the drain.
    pub persisted: usize,
    /// Writes still queued when the drain gave up.
    pub abandoned: usize,
    pub timed_out: bool,
}

/// Batcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub pending_devices: usize,
    pub pending_writes: usize,
    pub persisted: u64,
    pub failed: u64,
    pub flush_passes: u64,
}

// =============================================================================
// Batcher
// =============================================================================

/// Per-device write queues plus the single-flight flush.
pub struct WriteBackBatcher {
    store: Arc<dyn PinHistoryStore>,
    config: BatcherConfig,
    queues: DashMap<i64, VecDeque<PendingWrite>>,
    pending: AtomicUsize,
    flushing: AtomicBool,
    trigger_tx: mpsc::Sender<()>,
    persisted: AtomicU64,
    failed: AtomicU64,
    passes: AtomicU64,
}

/// Resets the in-flight flag when a pass ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl WriteBackBatcher {
    /// Creates a batcher and the worker that drives it.
    pub fn new(store: Arc<dyn PinHistoryStore>, config: BatcherConfig) -> (Arc<Self>, FlushWorker) {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let batcher = Arc::new(Self {
            store,
            config,
            queues: DashMap::new(),
            pending: AtomicUsize::new(0),
            flushing: AtomicBool::new(false),
            trigger_tx,
            persisted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        });

        let worker = FlushWorker {
            batcher: batcher.clone(),
            trigger_rx,
        };

        (batcher, worker)
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Queues a write. Signals the worker once the threshold is reached.
    pub fn enqueue(&self, identity: &DeviceIdentity, pin: VirtualPin, value: &str) {
        let write = PendingWrite {
            identity: identity.clone(),
            pin,
            value: value.to_string(),
            enqueued_at: Utc::now().timestamp_millis(),
        };

        let total = {
            let mut queue = self.queues.entry(identity.device_id).or_default();
            queue.push_back(write);
            self.pending.fetch_add(1, Ordering::AcqRel) + 1
        };

        if total >= self.config.flush_threshold {
            // A full channel already holds a trigger
            let _ = self.trigger_tx.try_send(());
        }
    }

    /// Runs one flush pass unless another is in flight.
    ///
    /// ## Returns
    /// `Some(persisted)` if this call ran a pass, `None` if it was skipped.
    pub async fn flush(&self) -> Option<usize> {
        self.try_pass(None).await
    }

    /// Flushes until nothing is pending, bounded by `timeout`.
    ///
    /// A running pass is never cancelled. Once the deadline passes, the
    /// current pass stops between records and puts the rest back at the
    /// head of their queues; they are reported as abandoned.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut report = DrainReport::default();
        let deadline = Instant::now() + timeout;

        while self.pending_writes() > 0 {
            if Instant::now() >= deadline {
                report.timed_out = true;
                break;
            }
            match self.try_pass(Some(deadline)).await {
                Some(n) => report.persisted += n,
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }

        report.abandoned = self.pending_writes();
        if report.abandoned > 0 {
            report.timed_out = true;
        }
        report
    }

    async fn try_pass(&self, deadline: Option<Instant>) -> Option<usize> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in progress, skipping");
            return None;
        }
        let _guard = FlightGuard(&self.flushing);
        self.passes.fetch_add(1, Ordering::Relaxed);

        let persisted = self.run_pass(deadline).await;

        self.persisted.fetch_add(persisted as u64, Ordering::Relaxed);
        if persisted > 0 {
            debug!(persisted, remaining = self.pending_writes(), "Flush pass complete");
        }
        Some(persisted)
    }

    async fn run_pass(&self, deadline: Option<Instant>) -> usize {
        let devices: Vec<i64> = self.queues.iter().map(|e| *e.key()).collect();
        let mut persisted = 0;

        for device_id in devices {
            let batch: Vec<PendingWrite> = match self.queues.get_mut(&device_id) {
                Some(mut queue) => {
                    let take = queue.len().min(self.config.per_device_cap);
                    self.pending.fetch_sub(take, Ordering::AcqRel);
                    queue.drain(..take).collect()
                }
                None => continue,
            };

            let mut writes = batch.into_iter();
            while let Some(write) = writes.next() {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    let rest: Vec<PendingWrite> = std::iter::once(write).chain(writes).collect();
                    self.requeue_front(device_id, rest);
                    return persisted;
                }
                match self.store.append(&write.to_sample()).await {
                    Ok(()) => persisted += 1,
                    Err(e) => {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        error!(
                            device_id,
                            pin = %write.pin.label(),
                            error = %e,
                            "Failed to persist pin write, skipping"
                        );
                    }
                }
            }

            self.queues.remove_if(&device_id, |_, queue| queue.is_empty());
        }

        persisted
    }

    /// Puts untouched writes back ahead of anything enqueued meanwhile.
    fn requeue_front(&self, device_id: i64, writes: Vec<PendingWrite>) {
        let mut queue = self.queues.entry(device_id).or_default();
        self.pending.fetch_add(writes.len(), Ordering::AcqRel);
        for write in writes.into_iter().rev() {
            queue.push_front(write);
        }
    }

    /// Drops every queued write of a device. Returns how many were dropped.
    pub fn discard_device(&self, device_id: i64) -> usize {
        match self.queues.remove(&device_id) {
            Some((_, queue)) => {
                self.pending.fetch_sub(queue.len(), Ordering::AcqRel);
                queue.len()
            }
            None => 0,
        }
    }

    /// Devices that currently have queued writes.
    pub fn pending_device_ids(&self) -> Vec<i64> {
        self.queues.iter().map(|e| *e.key()).collect()
    }

    /// Number of queued writes across all devices.
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// True while a flush pass is running.
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Deletes history older than the retention window.
    pub async fn sweep_retention(&self) -> SyncResult<u64> {
        let window = i64::try_from(self.config.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp_millis().saturating_sub(window);
        let deleted = self.store.prune_keep_latest(cutoff).await?;
        info!(deleted, cutoff_ms = cutoff, "Pin history retention sweep complete");
        Ok(deleted)
    }

    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            pending_devices: self.queues.len(),
            pending_writes: self.pending_writes(),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            flush_passes: self.passes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Flush Worker
// =============================================================================

/// Background task that owns the flush triggers.
pub struct FlushWorker {
    batcher: Arc<WriteBackBatcher>,
    trigger_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the flush worker.
pub struct FlushWorkerHandle {
    shutdown_tx: mpsc::Sender<oneshot::Sender<DrainReport>>,
    task: JoinHandle<()>,
}

impl FlushWorkerHandle {
    /// Stops the worker after a bounded drain and returns the drain report.
    pub async fn shutdown(self) -> SyncResult<DrainReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shutdown_tx
            .send(reply_tx)
            .await
            .map_err(|_| SyncError::ChannelError("Flush worker already stopped".into()))?;

        let report = reply_rx
            .await
            .map_err(|_| SyncError::ChannelError("Flush worker dropped drain reply".into()))?;

        if let Err(e) = self.task.await {
            warn!(?e, "Flush worker task ended abnormally");
        }
        Ok(report)
    }
}

impl FlushWorker {
    /// Spawns the worker loop.
    pub fn spawn(self) -> FlushWorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        FlushWorkerHandle { shutdown_tx, task }
    }

    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<oneshot::Sender<DrainReport>>) {
        let period = self.batcher.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = period.as_secs(),
            threshold = self.batcher.config.flush_threshold,
            "Flush worker starting"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.batcher.flush().await;
                }

                Some(()) = self.trigger_rx.recv() => {
                    debug!(pending = self.batcher.pending_writes(), "Threshold flush");
                    self.batcher.flush().await;
                }

                reply = shutdown_rx.recv() => {
                    let timeout = self.batcher.config.shutdown_timeout;
                    info!(pending = self.batcher.pending_writes(), "Flush worker draining");
                    let report = self.batcher.drain(timeout).await;
                    if report.timed_out {
                        warn!(abandoned = report.abandoned, "Shutdown flush timed out");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                    break;
                }
            }
        }

        info!("Flush worker stopped");
    }
}
