//! pairgate Core - Shared types and protocol definitions
//!
//! This crate provides the foundational types used across all pairgate components.

pub mod config;
pub mod error;
pub mod pairing_code;
pub mod protocol;
pub mod session;

pub use config::{Config, PublisherKind, ReconnectPolicy, SessionIdMode, StoreBackend};
pub use error::{Error, Result};
pub use pairing_code::{format_pairing_code, normalize_phone};
pub use protocol::{ClientEvent, ConnectionState, ConnectionUpdate, DisconnectReason};
pub use session::{AuthState, SessionId, DEFAULT_SESSION_PREFIX};
