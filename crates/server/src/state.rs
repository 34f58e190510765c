//! Application state shared across handlers.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use warden_core::config::AppConfig;
use warden_restore::{FormatRegistry, Manager, Restarter};

/// Restarts the service by cancelling the token the HTTP server shuts down
/// on. The process supervisor is expected to start a fresh instance.
#[derive(Clone, Default)]
pub struct CancellationRestarter {
    token: CancellationToken,
}

impl CancellationRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled once a restart was requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Restarter for CancellationRestarter {
    fn restart(&self) {
        tracing::info!("Restart requested after successful restore");
        self.token.cancel();
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Owner of the active restore.
    pub manager: Arc<Manager>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, registry: FormatRegistry, restarter: Arc<dyn Restarter>) -> Self {
        let manager = Manager::new(Arc::new(registry), config.restore.clone(), restarter);
        Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
        }
    }
}
