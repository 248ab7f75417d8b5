//! Shared application state

use pairgate_auth::LifecycleController;
use pairgate_core::Config;
use tokio::sync::Mutex;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Drives linking attempts
    pub controller: LifecycleController,
    /// Serializes the code-delivery leg of `/pair` across callers
    pub pair_lock: Mutex<()>,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, controller: LifecycleController) -> Self {
        Self {
            config,
            controller,
            pair_lock: Mutex::new(()),
        }
    }
}
