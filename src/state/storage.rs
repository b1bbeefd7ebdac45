use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{dao::session_store::SessionStore, error::ServiceError};

/// Storage sub-state carved out from [`AppState`](super::AppState) so session
/// actors can reach the backend without holding the whole application state.
pub struct StorageSlot {
    store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
}

impl StorageSlot {
    /// Start without a backend, in degraded mode.
    pub fn new() -> Self {
        let (degraded, _rx) = watch::channel(true);
        Self {
            store: RwLock::new(None),
            degraded,
        }
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn SessionStore>> {
        self.store.read().await.as_ref().cloned()
    }

    /// Like [`store`](Self::store), failing with [`ServiceError::Degraded`] when
    /// no store is installed or the installed one is marked unhealthy.
    pub async fn require(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn install(&self, store: Arc<dyn SessionStore>) {
        *self.store.write().await = Some(store);
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update the degraded flag, notifying watchers only on change.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

impl Default for StorageSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::session_store::memory::MemorySessionStore;

    #[tokio::test]
    async fn require_follows_the_degraded_flag() {
        let slot = StorageSlot::new();
        assert!(matches!(slot.require().await, Err(ServiceError::Degraded)));

        slot.install(Arc::new(MemorySessionStore::new())).await;
        assert!(slot.require().await.is_ok());

        slot.update_degraded(true);
        assert!(matches!(slot.require().await, Err(ServiceError::Degraded)));
        assert!(slot.store().await.is_some());

        slot.update_degraded(false);
        assert!(slot.require().await.is_ok());
    }
}
