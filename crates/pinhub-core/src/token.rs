//! # Device Tokens
//!
//! A device token is the string a device presents in LOGIN:
//!
//! ```text
//! ownerId-dashboardId-deviceId-secret
//! └──┬──┘ └────┬────┘ └───┬──┘ └─┬──┘
//!    │         │          │      └── last segment, non-empty
//!    │         │          └───────── i64
//!    │         └──────────────────── i64
//!    └────────────────────────────── everything before, may contain '-'
//! ```
//!
//! Parsing runs right-to-left so owners like `acme-labs` survive. A parsed
//! token is only trusted once its canonical form matches the stored record
//! byte for byte; see `pinhub_sync::auth::TokenValidator`.

use std::fmt;
use std::str::FromStr;

use crate::error::TokenError;
use crate::types::DeviceIdentity;

/// A structurally valid device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceToken {
    identity: DeviceIdentity,
    secret: String,
}

impl DeviceToken {
    /// Builds a token from its parts.
    pub fn new(identity: DeviceIdentity, secret: impl Into<String>) -> Self {
        DeviceToken {
            identity,
            secret: secret.into(),
        }
    }

    /// Parses a raw token string.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        if raw.is_empty() {
            return Err(TokenError::Empty);
        }

        let segments: Vec<&str> = raw.split('-').collect();
        if segments.len() < 4 {
            return Err(TokenError::TooFewSegments(segments.len()));
        }

        let n = segments.len();
        let secret = segments[n - 1];
        let device_id = parse_number("device id", segments[n - 2])?;
        let dashboard_id = parse_number("dashboard id", segments[n - 3])?;
        let owner_id = segments[..n - 3].join("-");

        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if owner_id.is_empty() {
            return Err(TokenError::EmptyOwner);
        }

        Ok(DeviceToken {
            identity: DeviceIdentity::new(owner_id, dashboard_id, device_id),
            secret: secret.to_string(),
        })
    }

    /// Returns the identity encoded in the token.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Consumes the token, returning its identity.
    pub fn into_identity(self) -> DeviceIdentity {
        self.identity
    }

    /// Returns the secret segment.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Rebuilds the canonical `owner-dashboard-device-secret` string.
    pub fn canonical(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.identity.owner_id, self.identity.dashboard_id, self.identity.device_id, self.secret
        )
    }

    /// Returns true if `stored` is exactly this token's canonical form.
    pub fn matches(&self, stored: &str) -> bool {
        self.canonical() == stored
    }
}

fn parse_number(field: &'static str, segment: &str) -> Result<i64, TokenError> {
    segment.parse::<i64>().map_err(|_| TokenError::InvalidNumber {
        field,
        segment: segment.to_string(),
    })
}

impl FromStr for DeviceToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceToken::parse(s)
    }
}

// The secret never appears in logs.
impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-***", self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "user1-100-7-abc123secretsecret";

    #[test]
    fn test_parse_simple() {
        let token = DeviceToken::parse(VALID).unwrap();
        assert_eq!(token.identity().owner_id, "user1");
        assert_eq!(token.identity().dashboard_id, 100);
        assert_eq!(token.identity().device_id, 7);
        assert_eq!(token.secret(), "abc123secretsecret");
        assert_eq!(token.canonical(), VALID);
    }

    #[test]
    fn test_owner_may_contain_dashes() {
        let token = DeviceToken::parse("acme-labs-eu-3-42-s3cr3t").unwrap();
        assert_eq!(token.identity().owner_id, "acme-labs-eu");
        assert_eq!(token.identity().dashboard_id, 3);
        assert_eq!(token.identity().device_id, 42);
        assert_eq!(token.canonical(), "acme-labs-eu-3-42-s3cr3t");
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(DeviceToken::parse(""), Err(TokenError::Empty));
        assert_eq!(
            DeviceToken::parse("user-1-secret"),
            Err(TokenError::TooFewSegments(3))
        );
        assert!(matches!(
            DeviceToken::parse("user-x-7-secret"),
            Err(TokenError::InvalidNumber { field: "dashboard id", .. })
        ));
        assert!(matches!(
            DeviceToken::parse("user-1-y-secret"),
            Err(TokenError::InvalidNumber { field: "device id", .. })
        ));
        assert_eq!(DeviceToken::parse("user-1-2-"), Err(TokenError::EmptySecret));
        assert_eq!(DeviceToken::parse("-1-2-secret"), Err(TokenError::EmptyOwner));
    }

    #[test]
    fn test_single_character_mutation_breaks_match() {
        let token = DeviceToken::parse(VALID).unwrap();
        let bytes = VALID.as_bytes();
        for i in 0..bytes.len() {
            let mut mutated = bytes.to_vec();
            mutated[i] = if mutated[i] == b'z' { b'y' } else { b'z' };
            let mutated = String::from_utf8(mutated).unwrap();
            // The stored record stays the same; the presented string changes.
            let accepted = DeviceToken::parse(&mutated)
                .map(|t| t.identity() == token.identity() && t.matches(VALID))
                .unwrap_or(false);
            assert!(!accepted, "mutation at {} was accepted: {}", i, mutated);
        }
    }

    #[test]
    fn test_match_uses_canonical_numbers() {
        // "007" parses to 7, so the canonical form is "7"
        let token = DeviceToken::parse("user1-100-007-abc").unwrap();
        assert!(!token.matches("user1-100-007-abc"));
        assert!(token.matches("user1-100-7-abc"));
    }

    #[test]
    fn test_display_hides_secret() {
        let token = DeviceToken::parse(VALID).unwrap();
        assert!(!token.to_string().contains("secret"));
    }
}
