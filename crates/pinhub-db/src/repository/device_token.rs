//! # Device Token Repository
//!
//! The token on record is the sole source of truth for device LOGIN. A token
//! string presented by a device is accepted only if it equals the stored one,
//! so replacing the row revokes every earlier string at once.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};

use pinhub_core::DeviceIdentity;

use crate::error::DbResult;

/// A stored device token.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DeviceTokenRecord {
    pub owner_id: String,
    pub dashboard_id: i64,
    pub device_id: i64,
    pub token: String,
    pub issued_at: i64,
}

impl DeviceTokenRecord {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.owner_id.clone(), self.dashboard_id, self.device_id)
    }
}

/// Repository for device token records.
#[derive(Debug, Clone)]
pub struct DeviceTokenRepository {
    pool: SqlitePool,
}

impl DeviceTokenRepository {
    /// Creates a new DeviceTokenRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceTokenRepository { pool }
    }

    /// Returns the token on record for a device.
    pub async fn find_token(&self, identity: &DeviceIdentity) -> DbResult<Option<String>> {
        let token: Option<String> = sqlx::query_scalar(
            r#"
            SELECT token FROM device_tokens
            WHERE owner_id = ?1 AND dashboard_id = ?2 AND device_id = ?3
            "#,
        )
        .bind(&identity.owner_id)
        .bind(identity.dashboard_id)
        .bind(identity.device_id)
        .fetch_optional(&self.pool)
        .await?;

        debug!(device = %identity, found = token.is_some(), "Token lookup");
        Ok(token)
    }

    /// Stores `token` for a device, replacing any previous one.
    pub async fn upsert_token(&self, identity: &DeviceIdentity, token: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO device_tokens (owner_id, dashboard_id, device_id, token, issued_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (owner_id, dashboard_id, device_id)
            DO UPDATE SET token = excluded.token, issued_at = excluded.issued_at
            "#,
        )
        .bind(&identity.owner_id)
        .bind(identity.dashboard_id)
        .bind(identity.device_id)
        .bind(token)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        info!(device = %identity, "Device token issued");
        Ok(())
    }

    /// Removes the token of a device. Returns true if one existed.
    pub async fn delete_token(&self, identity: &DeviceIdentity) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM device_tokens
            WHERE owner_id = ?1 AND dashboard_id = ?2 AND device_id = ?3
            "#,
        )
        .bind(&identity.owner_id)
        .bind(identity.dashboard_id)
        .bind(identity.device_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists every record, ordered by device.
    pub async fn list(&self) -> DbResult<Vec<DeviceTokenRecord>> {
        let records = sqlx::query_as::<_, DeviceTokenRecord>(
            r#"
            SELECT owner_id, dashboard_id, device_id, token, issued_at
            FROM device_tokens
            ORDER BY owner_id, dashboard_id, device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, DbError};

    async fn repo() -> DeviceTokenRepository {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .device_tokens()
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let repo = repo().await;
        let device = DeviceIdentity::new("user1", 100, 7);

        assert_eq!(repo.find_token(&device).await.unwrap(), None);

        repo.upsert_token(&device, "user1-100-7-first").await.unwrap();
        assert_eq!(
            repo.find_token(&device).await.unwrap().as_deref(),
            Some("user1-100-7-first")
        );

        // Reissue replaces the previous token
        repo.upsert_token(&device, "user1-100-7-second").await.unwrap();
        assert_eq!(
            repo.find_token(&device).await.unwrap().as_deref(),
            Some("user1-100-7-second")
        );
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_is_scoped_to_full_identity() {
        let repo = repo().await;
        repo.upsert_token(&DeviceIdentity::new("user1", 100, 7), "user1-100-7-s")
            .await
            .unwrap();

        let other_dash = DeviceIdentity::new("user1", 101, 7);
        let other_owner = DeviceIdentity::new("user2", 100, 7);
        assert_eq!(repo.find_token(&other_dash).await.unwrap(), None);
        assert_eq!(repo.find_token(&other_owner).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_token_string_rejected() {
        let repo = repo().await;
        repo.upsert_token(&DeviceIdentity::new("user1", 100, 7), "same")
            .await
            .unwrap();
        let err = repo
            .upsert_token(&DeviceIdentity::new("user1", 100, 8), "same")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref constraint } if constraint == "device_tokens.token"
        ));
    }

    #[tokio::test]
    async fn test_delete_token() {
        let repo = repo().await;
        let device = DeviceIdentity::new("user1", 100, 7);
        repo.upsert_token(&device, "user1-100-7-s").await.unwrap();

        assert!(repo.delete_token(&device).await.unwrap());
        assert!(!repo.delete_token(&device).await.unwrap());
        assert_eq!(repo.find_token(&device).await.unwrap(), None);
    }
}
