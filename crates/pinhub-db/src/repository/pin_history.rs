//! # Pin History Repository
//!
//! Durable log of virtual pin writes.
//!
//! ## Write-back Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  device vw ──► cache (latest value) ──► batcher queue (per device)     │
//! │                                              │                          │
//! │                                              │ flush pass (one worker)  │
//! │                                              ▼                          │
//! │                           INSERT INTO pin_history (..., ts)             │
//! │                           ts = time the write was queued                │
//! │                                                                         │
//! │  retention task (daily):                                                │
//! │     DELETE rows older than the window                                   │
//! │     EXCEPT the newest row of every (device_id, pin)                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// A persisted pin sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PinSample {
    pub id: i64,
    pub owner_id: String,
    pub dashboard_id: i64,
    pub device_id: i64,
    /// Pin label, `V<n>`.
    pub pin: String,
    pub value: String,
    /// Epoch milliseconds.
    pub ts: i64,
}

impl PinSample {
    /// Returns the sample time as a `DateTime`.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.ts).single()
    }
}

/// A sample about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPinSample {
    pub owner_id: String,
    pub dashboard_id: i64,
    pub device_id: i64,
    pub pin: String,
    pub value: String,
    pub ts: i64,
}

/// Repository for pin history operations.
#[derive(Debug, Clone)]
pub struct PinHistoryRepository {
    pool: SqlitePool,
}

impl PinHistoryRepository {
    /// Creates a new PinHistoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PinHistoryRepository { pool }
    }

    /// Appends one sample, returning its row id.
    pub async fn insert(&self, sample: &NewPinSample) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO pin_history (owner_id, dashboard_id, device_id, pin, value, ts)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&sample.owner_id)
        .bind(sample.dashboard_id)
        .bind(sample.device_id)
        .bind(&sample.pin)
        .bind(&sample.value)
        .bind(sample.ts)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Deletes samples older than `cutoff_ms`, keeping the newest sample of
    /// every (device, pin) regardless of age.
    ///
    /// ## Returns
    /// Number of deleted rows.
    pub async fn delete_older_than_keep_latest(&self, cutoff_ms: i64) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM pin_history
            WHERE ts < ?1
              AND id NOT IN (
                  SELECT id FROM (
                      SELECT id,
                             ROW_NUMBER() OVER (
                                 PARTITION BY device_id, pin
                                 ORDER BY ts DESC, id DESC
                             ) AS rn
                      FROM pin_history
                  )
                  WHERE rn = 1
              )
            "#,
        )
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;

        debug!(
            cutoff_ms,
            deleted = result.rows_affected(),
            "Pin history retention sweep"
        );

        Ok(result.rows_affected())
    }

    /// Returns the newest sample for a device pin.
    pub async fn latest(&self, device_id: i64, pin: &str) -> DbResult<Option<PinSample>> {
        let sample = sqlx::query_as::<_, PinSample>(
            r#"
            SELECT id, owner_id, dashboard_id, device_id, pin, value, ts
            FROM pin_history
            WHERE device_id = ?1 AND pin = ?2
            ORDER BY ts DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .bind(pin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sample)
    }

    /// Returns every sample of a device in insertion order.
    pub async fn for_device(&self, device_id: i64) -> DbResult<Vec<PinSample>> {
        let samples = sqlx::query_as::<_, PinSample>(
            r#"
            SELECT id, owner_id, dashboard_id, device_id, pin, value, ts
            FROM pin_history
            WHERE device_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(samples)
    }

    /// Counts all samples.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pin_history")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Counts samples of one device pin.
    pub async fn count_for(&self, device_id: i64, pin: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pin_history WHERE device_id = ?1 AND pin = ?2",
        )
        .bind(device_id)
        .bind(pin)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
