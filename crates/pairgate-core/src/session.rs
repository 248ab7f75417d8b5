//! Session identity and authentication state
//!
//! A [`SessionId`] names one linking attempt for its whole lifetime, across
//! reconnects. [`AuthState`] is the credential and key material the protocol
//! client produces; it is opaque here apart from a couple of well-known
//! fields in `creds`.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Prefix applied to server-generated session IDs
pub const DEFAULT_SESSION_PREFIX: &str = "Naxor~";

/// Longest accepted caller-supplied session ID
const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque identifier of one linking attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random ID: `<prefix>` followed by 16 hex characters
    pub fn generate(prefix: &str) -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("{}{}", prefix, hex::encode(bytes)))
    }

    /// Accept a caller-supplied ID
    ///
    /// The ID doubles as a directory name for local auth state, so path
    /// separators are rejected along with blank or oversized values.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSessionId("session ID is empty".to_string()));
        }
        if trimmed.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidSessionId(format!(
                "session ID exceeds {} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
            return Err(Error::InvalidSessionId(format!(
                "session ID {:?} is not a valid name",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Credential and key material for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    /// Long-lived credentials (identity keys, registration info, account)
    pub creds: Value,
    /// Signal key store contents, grouped by key category
    pub keys: Value,
}

impl Default for AuthState {
    fn default() -> Self {
        Self {
            creds: json!({}),
            keys: json!({}),
        }
    }
}

impl AuthState {
    pub fn new(creds: Value, keys: Value) -> Self {
        Self { creds, keys }
    }

    /// Whether the handshake has completed for these credentials
    pub fn is_registered(&self) -> bool {
        self.creds
            .get("registered")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The linked account's own ID, once known
    pub fn account_id(&self) -> Option<&str> {
        self.creds
            .get("me")
            .and_then(|me| me.get("id"))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let id = SessionId::generate(DEFAULT_SESSION_PREFIX);
        let suffix = id.as_str().strip_prefix(DEFAULT_SESSION_PREFIX).unwrap();
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let other = SessionId::generate(DEFAULT_SESSION_PREFIX);
        assert_ne!(id, other);
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("   ").is_err());
        assert!(SessionId::parse("../etc").is_err());
        assert!(SessionId::parse("a\\b").is_err());
        assert!(SessionId::parse("..").is_err());
        assert!(SessionId::parse(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_parse_trims() {
        let id = SessionId::parse("  my-bot  ").unwrap();
        assert_eq!(id.as_str(), "my-bot");
        assert_eq!(id.to_string(), "my-bot");
    }

    #[test]
    fn test_auth_state_fields() {
        let state = AuthState::default();
        assert!(!state.is_registered());
        assert_eq!(state.account_id(), None);

        let state = AuthState::new(
            json!({"registered": true, "me": {"id": "15551234567:3@s.whatsapp.net"}}),
            json!({}),
        );
        assert!(state.is_registered());
        assert_eq!(state.account_id(), Some("15551234567:3@s.whatsapp.net"));
    }
}
