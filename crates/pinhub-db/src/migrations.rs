//! # Database Migrations
//!
//! Embedded SQL migrations for the gateway's own tables.
//!
//! ## Schema
//! ```text
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │ pin_history                  │     │ device_tokens                │
//! │ ──────────────────────────── │     │ ──────────────────────────── │
//! │ id (autoincrement)           │     │ owner_id      ┐              │
//! │ owner_id, dashboard_id       │     │ dashboard_id  ├─ primary key │
//! │ device_id, pin ("V9")        │     │ device_id     ┘              │
//! │ value, ts (epoch ms)         │     │ token, issued_at             │
//! └──────────────────────────────┘     └──────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. **NEVER** modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations.
///
/// Idempotent: already-applied migrations are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}
