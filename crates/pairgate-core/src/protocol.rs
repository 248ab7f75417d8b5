//! Events emitted by the protocol client during a linking attempt

use serde::{Deserialize, Serialize};

use crate::session::AuthState;

/// Machine-readable status explaining why a connection closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisconnectReason(pub u16);

impl DisconnectReason {
    pub const LOGGED_OUT: Self = Self(401);
    pub const CONNECTION_LOST: Self = Self(408);
    pub const MULTIDEVICE_MISMATCH: Self = Self(411);
    pub const CONNECTION_CLOSED: Self = Self(428);
    pub const CONNECTION_REPLACED: Self = Self(440);
    pub const BAD_SESSION: Self = Self(500);
    pub const UNAVAILABLE_SERVICE: Self = Self(503);
    pub const RESTART_REQUIRED: Self = Self(515);

    /// Reasons that warrant reconnecting with the same session
    const TRANSIENT: [Self; 3] = [
        Self::CONNECTION_LOST,
        Self::CONNECTION_CLOSED,
        Self::RESTART_REQUIRED,
    ];

    pub fn code(&self) -> u16 {
        self.0
    }

    /// Whether a close with this reason should be followed by a reconnect
    pub fn is_transient(&self) -> bool {
        Self::TRANSIENT.contains(self)
    }

    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self.0 {
            401 => "logged out",
            403 => "forbidden",
            408 => "connection lost",
            411 => "multi-device mismatch",
            428 => "connection closed",
            440 => "connection replaced",
            500 => "bad session",
            503 => "service unavailable",
            515 => "restart required",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}

/// Coarse connection state reported by the protocol client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// A connection-state change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    /// New state, if the update carries one
    #[serde(default)]
    pub connection: Option<ConnectionState>,
    /// Reason for the last disconnect (present on close)
    #[serde(default)]
    pub last_disconnect: Option<DisconnectReason>,
    /// Own account ID, reported once the connection opens
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ConnectionUpdate {
    pub fn open(user_id: impl Into<String>) -> Self {
        Self {
            connection: Some(ConnectionState::Open),
            last_disconnect: None,
            user_id: Some(user_id.into()),
        }
    }

    pub fn closed(reason: Option<DisconnectReason>) -> Self {
        Self {
            connection: Some(ConnectionState::Close),
            last_disconnect: reason,
            user_id: None,
        }
    }
}

/// Everything a protocol client reports back to the lifecycle controller
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Local credential/key state was refreshed
    CredsUpdate(AuthState),
    /// Connection state changed
    Connection(ConnectionUpdate),
}
