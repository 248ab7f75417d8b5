//! Configuration types for pairgate

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::DEFAULT_SESSION_PREFIX;

/// Marker prepended to the published credential pointer
pub const DEFAULT_MARKER: &str = "Secktor;;;";

/// Where session records are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    File,
    Memory,
    Postgres,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" | "json" => Ok(StoreBackend::File),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            _ => Err(format!("Invalid store: {}. Use: file, memory, postgres", s)),
        }
    }
}

/// How finished credentials are republished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PublisherKind {
    /// Upload the creds file to pastebin and send back its base64'd paste key
    #[default]
    Pastebin,
    /// Post the base64'd session ID to a generic paste endpoint
    Relay,
}

impl std::str::FromStr for PublisherKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pastebin" | "paste" => Ok(PublisherKind::Pastebin),
            "relay" | "form" => Ok(PublisherKind::Relay),
            _ => Err(format!("Invalid publisher: {}. Use: pastebin, relay", s)),
        }
    }
}

/// Who chooses the session ID for a pairing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionIdMode {
    /// Server generates `<prefix><hex>`
    #[default]
    Generated,
    /// Caller passes `sessionId` in the request
    CallerSupplied,
}

/// Bounded exponential backoff for reconnecting after transient closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Consecutive reconnects allowed; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnect
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Policy that reconnects forever with no delay
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Whether another reconnect is allowed after `attempts` consecutive ones
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    /// Delay before reconnect number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Main configuration for pairgate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Base URL of the messaging gateway
    pub gateway_url: String,
    /// Bearer token for the gateway (if it requires one)
    pub gateway_token: Option<String>,
    /// Root directory for per-session local auth files
    pub auth_dir: PathBuf,
    /// Session store backend
    pub store: StoreBackend,
    /// File path for the file store (platform data dir if None)
    pub store_path: Option<PathBuf>,
    /// Connection string for the Postgres store
    pub database_url: Option<String>,
    /// Credential publisher strategy
    pub publisher: PublisherKind,
    /// Pastebin developer API key
    pub paste_api_key: Option<String>,
    /// Title given to uploaded pastes
    pub paste_title: String,
    /// Endpoint for the relay publisher
    pub relay_url: Option<String>,
    /// Marker prepended to the delivered pointer
    pub marker: String,
    /// Prefix for generated session IDs
    pub session_prefix: String,
    /// Who picks session IDs
    pub session_id_mode: SessionIdMode,
    /// Directory served instead of the embedded pages
    pub pages_dir: Option<PathBuf>,
    /// Wait before requesting a pairing code
    pub code_request_delay: Duration,
    /// Wait after the connection opens before publishing
    pub publish_delay: Duration,
    /// Reconnect behaviour after transient closes
    pub reconnect: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            gateway_url: "http://127.0.0.1:8787".to_string(),
            gateway_token: None,
            auth_dir: PathBuf::from("./session"),
            store: StoreBackend::File,
            store_path: None,
            database_url: None,
            publisher: PublisherKind::Pastebin,
            paste_api_key: None,
            paste_title: "creds.json".to_string(),
            relay_url: None,
            marker: DEFAULT_MARKER.to_string(),
            session_prefix: DEFAULT_SESSION_PREFIX.to_string(),
            session_id_mode: SessionIdMode::Generated,
            pages_dir: None,
            code_request_delay: Duration::from_millis(1500),
            publish_delay: Duration::from_millis(5000),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set listen host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set gateway URL and optional token
    pub fn with_gateway(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.gateway_url = url.into();
        self.gateway_token = token;
        self
    }

    /// Builder pattern: set the local auth directory root
    pub fn with_auth_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.auth_dir = dir.into();
        self
    }

    /// Builder pattern: set the session store backend
    pub fn with_store(
        mut self,
        store: StoreBackend,
        store_path: Option<PathBuf>,
        database_url: Option<String>,
    ) -> Self {
        self.store = store;
        self.store_path = store_path;
        self.database_url = database_url;
        self
    }

    /// Builder pattern: set the publisher strategy
    pub fn with_publisher(mut self, publisher: PublisherKind) -> Self {
        self.publisher = publisher;
        self
    }

    /// Builder pattern: set pastebin credentials and paste title
    pub fn with_pastebin(mut self, api_key: Option<String>, title: impl Into<String>) -> Self {
        self.paste_api_key = api_key;
        self.paste_title = title.into();
        self
    }

    /// Builder pattern: set relay endpoint
    pub fn with_relay_url(mut self, url: Option<String>) -> Self {
        self.relay_url = url;
        self
    }

    /// Builder pattern: set delivery marker
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Builder pattern: set how session IDs are chosen
    pub fn with_session_ids(mut self, mode: SessionIdMode, prefix: impl Into<String>) -> Self {
        self.session_id_mode = mode;
        self.session_prefix = prefix.into();
        self
    }

    /// Builder pattern: serve pages from disk
    pub fn with_pages_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.pages_dir = dir;
        self
    }

    /// Builder pattern: set the fixed lifecycle delays
    pub fn with_delays(mut self, code_request: Duration, publish: Duration) -> Self {
        self.code_request_delay = code_request;
        self.publish_delay = publish;
        self
    }

    /// Builder pattern: set reconnect policy
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Socket address string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.port, 3000);
        assert_eq!(config.auth_dir, PathBuf::from("./session"));
        assert_eq!(config.marker, "Secktor;;;");
        assert_eq!(config.session_prefix, "Naxor~");
        assert_eq!(config.code_request_delay, Duration::from_millis(1500));
        assert_eq!(config.publish_delay, Duration::from_secs(5));
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_attempt_ceiling() {
        let policy = ReconnectPolicy {
            max_attempts: Some(2),
            ..ReconnectPolicy::default()
        };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(ReconnectPolicy::unlimited().allows(u32::MAX));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("pg".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("Relay".parse::<PublisherKind>().unwrap(), PublisherKind::Relay);
        assert!("s3".parse::<StoreBackend>().is_err());
    }
}
