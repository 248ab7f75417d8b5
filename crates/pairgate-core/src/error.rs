//! Error types for pairgate

use thiserror::Error;

/// Main error type for shared pairgate operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid session ID: {0}")]
    InvalidSessionId(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using pairgate's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }
}
