//! pairgate server - Axum-based HTTP front door
//!
//! This crate serves the dashboard and exposes the pairing endpoint.

pub mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;
