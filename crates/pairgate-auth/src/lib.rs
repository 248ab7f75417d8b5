//! pairgate auth - Session storage and pairing lifecycle
//!
//! Drives a messaging-account linking attempt from pairing code to published
//! credentials, and persists session records along the way.
//!
//! # Linking Flow
//!
//! 1. HTTP front door calls `LifecycleController::begin()` with a phone number
//! 2. Controller builds a protocol client and requests a pairing code
//! 3. Formatted code is handed back through a `ResponseSink`
//! 4. User enters the code on their phone; the client reports refreshed creds
//! 5. Once the connection opens, creds are published and the pointer is sent
//!    to the linked account
//!
//! # Example
//!
//! ```no_run
//! use pairgate_auth::{LifecycleController, LifecycleSettings, MemorySessionStore, ResponseSink};
//! use pairgate_client::{GatewayConnector, GatewayOptions};
//! use pairgate_core::SessionId;
//! use pairgate_publish::RelayPublisher;
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let connector = GatewayConnector::new(GatewayOptions::new("http://127.0.0.1:8787")).unwrap();
//!     let publisher = RelayPublisher::new("https://relay.example/paste").unwrap();
//!     let controller = LifecycleController::new(
//!         Arc::new(MemorySessionStore::new()),
//!         Arc::new(connector),
//!         Arc::new(publisher),
//!         LifecycleSettings::default(),
//!     );
//!
//!     let (sink, code) = ResponseSink::channel();
//!     controller
//!         .begin(Some("+1 555 123 4567"), SessionId::generate("Naxor~"), Some(sink))
//!         .await
//!         .unwrap();
//!     if let Ok(reply) = code.await {
//!         println!("Enter on phone: {}", reply.code);
//!     }
//! }
//! ```

pub mod auth_dir;
pub mod lifecycle;
pub mod postgres;
pub mod storage;

pub use auth_dir::AuthDir;
pub use lifecycle::{
    AttemptPhase, LifecycleController, LifecycleSettings, LinkError, LinkResult, PairingReply,
    ResponseSink,
};
pub use postgres::PgSessionStore;
pub use storage::{
    open_store, FileSessionStore, MemorySessionStore, SessionRecord, SessionStore, StorageError,
    StorageResult,
};
