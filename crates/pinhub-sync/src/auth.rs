//! # Device Authentication
//!
//! Validates LOGIN tokens against the device registry.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  raw token ──► DeviceToken::parse ──► registry.find_token_by_device    │
//! │                    │ error                 │ none / error               │
//! │                    ▼                       ▼                            │
//! │                 INVALID                 INVALID                         │
//! │                                            │ some(stored)               │
//! │                                            ▼                            │
//! │                         canonical(parsed) == stored ? identity : INVALID│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use pinhub_core::{DeviceIdentity, DeviceToken};
use pinhub_db::DeviceTokenRepository;

use crate::error::SyncResult;

/// Source of the token on record for each device.
#[async_trait]
pub trait DeviceRegistry: Send + Sync + 'static {
    async fn find_token_by_device(&self, identity: &DeviceIdentity) -> SyncResult<Option<String>>;
}

#[async_trait]
impl DeviceRegistry for DeviceTokenRepository {
    async fn find_token_by_device(&self, identity: &DeviceIdentity) -> SyncResult<Option<String>> {
        Ok(self.find_token(identity).await?)
    }
}

/// In-memory registry for tests and single-process setups.
#[derive(Debug, Default)]
pub struct StaticDeviceRegistry {
    tokens: DashMap<DeviceIdentity, String>,
}

impl StaticDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the canonical form of `token` as its device's token on record.
    pub fn issue(&self, token: &DeviceToken) {
        self.tokens
            .insert(token.identity().clone(), token.canonical());
    }

    /// Revokes the token of a device.
    pub fn revoke(&self, identity: &DeviceIdentity) -> bool {
        self.tokens.remove(identity).is_some()
    }
}

#[async_trait]
impl DeviceRegistry for StaticDeviceRegistry {
    async fn find_token_by_device(&self, identity: &DeviceIdentity) -> SyncResult<Option<String>> {
        Ok(self.tokens.get(identity).map(|t| t.clone()))
    }
}

/// Checks presented tokens against the registry.
#[derive(Clone)]
pub struct TokenValidator {
    registry: Arc<dyn DeviceRegistry>,
}

impl TokenValidator {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the device identity if `raw` is the token on record.
    pub async fn validate(&self, raw: &str) -> Option<DeviceIdentity> {
        let token = match DeviceToken::parse(raw) {
            Ok(token) => token,
            Err(e) => {
                debug!(error = %e, "Malformed device token");
                return None;
            }
        };

        let stored = match self.registry.find_token_by_device(token.identity()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!(device = %token.identity(), "No token on record");
                return None;
            }
            Err(e) => {
                warn!(device = %token.identity(), error = %e, "Device registry lookup failed");
                return None;
            }
        };

        if token.matches(&stored) {
            Some(token.into_identity())
        } else {
            debug!(token = %token, "Token does not match record");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    const VALID: &str = "user1-100-7-abc123secretsecret";

    fn validator() -> (Arc<StaticDeviceRegistry>, TokenValidator) {
        let registry = Arc::new(StaticDeviceRegistry::new());
        registry.issue(&DeviceToken::parse(VALID).unwrap());
        (registry.clone(), TokenValidator::new(registry))
    }

    struct BrokenRegistry;

    #[async_trait]
    impl DeviceRegistry for BrokenRegistry {
        async fn find_token_by_device(&self, _: &DeviceIdentity) -> SyncResult<Option<String>> {
            Err(SyncError::DatabaseError("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_valid_token() {
        let (_, validator) = validator();
        let identity = validator.validate(VALID).await.unwrap();
        assert_eq!(identity, DeviceIdentity::new("user1", 100, 7));
    }

    #[tokio::test]
    async fn test_single_character_mutations_rejected() {
        let (_, validator) = validator();
        for (i, c) in VALID.char_indices() {
            let replacement = if c == 'x' { 'y' } else { 'x' };
            let mut mutated = VALID.to_string();
            mutated.replace_range(i..i + c.len_utf8(), &replacement.to_string());
            assert!(
                validator.validate(&mutated).await.is_none(),
                "mutation at {} accepted: {}",
                i,
                mutated
            );
        }
    }

    #[tokio::test]
    async fn test_revoked_and_unknown_devices() {
        let (registry, validator) = validator();
        assert!(validator.validate("user1-100-8-abc").await.is_none());

        registry.revoke(&DeviceIdentity::new("user1", 100, 7));
        assert!(validator.validate(VALID).await.is_none());
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous() {
        let (registry, validator) = validator();
        registry.issue(&DeviceToken::parse("user1-100-7-newsecret").unwrap());
        assert!(validator.validate(VALID).await.is_none());
        assert!(validator.validate("user1-100-7-newsecret").await.is_some());
    }

    #[tokio::test]
    async fn test_registry_failure_is_invalid() {
        let validator = TokenValidator::new(Arc::new(BrokenRegistry));
        assert!(validator.validate(VALID).await.is_none());
        assert!(validator.validate("").await.is_none());
    }
}
