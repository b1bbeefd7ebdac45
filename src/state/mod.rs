/// Session key to actor routing.
pub mod hub;
/// Sockets attached to a session.
pub mod registry;
/// In-memory session record.
pub mod session;
/// Installed storage backend and degraded flag.
pub mod storage;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::identity::{IdentityProvider, TrustedHeaderIdentity},
};

pub use self::hub::SessionHub;
use self::storage::StorageSlot;

/// State shared by every handler and background task.
pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, live session actors and identity resolution.
pub struct AppState {
    storage: Arc<StorageSlot>,
    sessions: SessionHub,
    identity: Arc<dyn IdentityProvider>,
    config: Arc<AppConfig>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_identity(config, Arc::new(TrustedHeaderIdentity))
    }

    /// Same as [`new`](Self::new) with a custom identity provider.
    pub fn with_identity(config: AppConfig, identity: Arc<dyn IdentityProvider>) -> SharedState {
        let storage = Arc::new(StorageSlot::new());
        let config = Arc::new(config);
        Arc::new(Self {
            sessions: SessionHub::new(storage.clone(), config.clone()),
            storage,
            identity,
            config,
        })
    }

    /// Storage slot shared with the session actors.
    pub fn storage(&self) -> &Arc<StorageSlot> {
        &self.storage
    }

    /// Registry of running session actors.
    pub fn sessions(&self) -> &SessionHub {
        &self.sessions
    }

    /// Resolves the role of connecting clients.
    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    /// Loaded application configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.storage.is_degraded()
    }
}
