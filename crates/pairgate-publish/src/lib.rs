//! pairgate Publish - Credential publishing
//!
//! Once a session links, its credentials are pushed to a paste service and a
//! short pointer to that paste is sent to the account's own chat. Two
//! interchangeable strategies implement [`CredentialPublisher`]:
//!
//! - [`PastebinPublisher`]: uploads `creds.json` as stored and delivers the
//!   base64'd paste key
//! - [`RelayPublisher`]: posts the base64'd session ID to a generic paste
//!   endpoint and delivers the returned path segment
//!
//! Note that both publish credential material (or a handle to it) through a
//! public third party.

pub mod pastebin;
pub mod relay;

use async_trait::async_trait;
use pairgate_core::{AuthState, Config, PublisherKind, SessionId};
use std::sync::Arc;
use thiserror::Error;

pub use pastebin::{PastebinPublisher, PASTEBIN_API_URL};
pub use relay::RelayPublisher;

/// Publishing errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Paste request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Paste backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Paste backend rejected the upload: {0}")]
    Rejected(String),
    #[error("Unexpected paste response: {0:?}")]
    UnexpectedResponse(String),
    #[error("Publisher configuration error: {0}")]
    Config(String),
}

pub type PublishResult<T> = Result<T, PublishError>;

/// Pointer to republished credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPointer {
    pub pointer: String,
}

impl PublishedPointer {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }

    /// Text of the message delivered to the linked account
    pub fn message_text(&self, marker: &str) -> String {
        format!("{}{}", marker, self.pointer)
    }
}

/// Republishes credentials of a freshly linked session
#[async_trait]
pub trait CredentialPublisher: Send + Sync {
    /// Short strategy name for logs
    fn name(&self) -> &'static str;

    /// Publish one session
    ///
    /// `creds_file` is the session's `creds.json` exactly as written to disk;
    /// `auth` is the same state parsed, keys included.
    async fn publish(
        &self,
        session_id: &SessionId,
        auth: &AuthState,
        creds_file: &str,
    ) -> PublishResult<PublishedPointer>;
}

/// Take the fourth `/`-separated segment of a paste URL
///
/// `https://host/KEY` splits into `["https:", "", "host", "KEY"]`.
pub fn extract_path_segment(url: &str) -> PublishResult<String> {
    let trimmed = url.trim();
    match trimmed.split('/').nth(3) {
        Some(segment) if !segment.is_empty() => Ok(segment.to_string()),
        _ => Err(PublishError::UnexpectedResponse(trimmed.to_string())),
    }
}

/// Build the publisher selected by configuration
pub fn build_publisher(config: &Config) -> PublishResult<Arc<dyn CredentialPublisher>> {
    match config.publisher {
        PublisherKind::Pastebin => {
            let key = config.paste_api_key.clone().ok_or_else(|| {
                PublishError::Config("pastebin publisher needs --paste-api-key".to_string())
            })?;
            Ok(Arc::new(PastebinPublisher::new(key, config.paste_title.clone())?))
        }
        PublisherKind::Relay => {
            let url = config.relay_url.clone().ok_or_else(|| {
                PublishError::Config("relay publisher needs --relay-url".to_string())
            })?;
            Ok(Arc::new(RelayPublisher::new(url)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_path_segment() {
        assert_eq!(extract_path_segment("https://pastebin.com/AbCd1234").unwrap(), "AbCd1234");
        assert_eq!(extract_path_segment("https://pastebin.com/AbCd1234\n").unwrap(), "AbCd1234");
        assert_eq!(extract_path_segment("https://paste.example/x/y").unwrap(), "x");
    }

    #[test]
    fn test_extract_rejects_short_urls() {
        assert!(matches!(
            extract_path_segment("https://pastebin.com"),
            Err(PublishError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            extract_path_segment("https://pastebin.com/"),
            Err(PublishError::UnexpectedResponse(_))
        ));
        assert!(extract_path_segment("not a url").is_err());
    }

    #[test]
    fn test_message_text() {
        let pointer = PublishedPointer::new("QWJDZDEyMzQ=");
        assert_eq!(pointer.message_text("Secktor;;;"), "Secktor;;;QWJDZDEyMzQ=");
    }

    #[test]
    fn test_build_publisher_requires_settings() {
        let config = Config::new();
        assert!(matches!(build_publisher(&config), Err(PublishError::Config(_))));

        let config = Config::new().with_pastebin(Some("key".to_string()), "creds.json");
        assert_eq!(build_publisher(&config).unwrap().name(), "pastebin");

        let config = Config::new()
            .with_publisher(PublisherKind::Relay)
            .with_relay_url(Some("https://relay.example/api".to_string()));
        assert_eq!(build_publisher(&config).unwrap().name(), "relay");
    }
}
