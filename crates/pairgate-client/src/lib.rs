//! pairgate Client - Messaging protocol client capability
//!
//! The messaging transport, its encryption and the multi-device handshake are
//! not implemented here. This crate defines the seam the lifecycle controller
//! drives ([`ClientConnector`] / [`LinkClient`]) and ships two
//! implementations:
//!
//! - [`GatewayConnector`]: talks HTTP to a sidecar process that hosts the
//!   messaging library and streams its events back via long polling
//! - [`MockConnector`]: scriptable in-process client for tests
//!
//! Events for one connection arrive on an ordered channel, so the consumer
//! sees them in the order the client emitted them.

pub mod gateway;
pub mod mock;

use async_trait::async_trait;
use pairgate_core::{AuthState, ClientEvent, DisconnectReason, SessionId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use gateway::{GatewayConnector, GatewayOptions};
pub use mock::{MockCall, MockClient, MockConnector};

/// Capacity of the per-connection event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Protocol client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gateway returned {status}: {body}")]
    Gateway { status: u16, body: String },
    #[error("Client is not connected")]
    NotConnected,
    #[error("Pairing code request rejected: {0}")]
    PairingRejected(String),
    #[error("{0}")]
    Other(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// A live protocol client bound to one session
#[async_trait]
pub trait LinkClient: Send + Sync {
    /// Whether the credentials this client was built from are already linked
    fn is_registered(&self) -> bool;

    /// Own account ID, known once the connection opens
    fn self_id(&self) -> Option<String>;

    /// Request a pairing code for a digits-only phone number
    async fn request_pairing_code(&self, phone_digits: &str) -> ClientResult<String>;

    /// Send a text message to `jid`
    async fn send_text(&self, jid: &str, text: &str) -> ClientResult<()>;

    /// Tear the connection down
    async fn end(&self, reason: Option<DisconnectReason>);
}

/// A freshly built client together with its event stream
pub struct Connection {
    pub client: Arc<dyn LinkClient>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Builds protocol clients from stored auth state
#[async_trait]
pub trait ClientConnector: Send + Sync {
    async fn connect(&self, session_id: &SessionId, auth: AuthState) -> ClientResult<Connection>;
}
