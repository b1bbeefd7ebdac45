use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, info, warn};

use crate::{
    config::AppConfig,
    services::session_actor::{SessionActor, SessionCommand, SessionHandle},
    state::storage::StorageSlot,
};

/// Routes session keys to their actor, spawning actors on first use.
///
/// At most one live actor exists per key: lookups and spawns go through the
/// map's entry API, and an evicted actor only unregisters the handle it was
/// spawned with.
pub struct SessionHub {
    sessions: Arc<DashMap<String, SessionHandle>>,
    storage: Arc<StorageSlot>,
    config: Arc<AppConfig>,
    next_instance: AtomicU64,
}

impl SessionHub {
    /// Empty hub; actors share `storage` and read their timings from `config`.
    pub fn new(storage: Arc<StorageSlot>, config: Arc<AppConfig>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            storage,
            config,
            next_instance: AtomicU64::new(1),
        }
    }

    /// Handle of the actor owning `key`, starting one if none is running.
    pub fn resolve(&self, key: &str) -> SessionHandle {
        match self.sessions.entry(key.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => entry.get().clone(),
            Entry::Occupied(mut entry) => {
                let handle = self.spawn(key);
                entry.insert(handle.clone());
                handle
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(key);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    /// Number of actors currently registered.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` when no actor is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start an actor for every session with a persisted alarm so pending
    /// history writes survive a restart.
    pub async fn rearm_pending_alarms(&self) {
        let Some(store) = self.storage.store().await else {
            return;
        };

        match store.list_alarms().await {
            Ok(alarms) => {
                if !alarms.is_empty() {
                    info!(count = alarms.len(), "re-arming persisted history alarms");
                }
                for (key, _deadline) in alarms {
                    self.resolve(&key);
                }
            }
            Err(err) => warn!(error = %err, "failed to list persisted history alarms"),
        }
    }

    /// Ask every running actor to load its persisted state now that storage is back.
    pub fn reload_sessions(&self) {
        for entry in self.sessions.iter() {
            if entry.value().send(SessionCommand::Reload).is_err() {
                debug!(session = %entry.key(), "actor stopped before reload");
            }
        }
    }

    fn spawn(&self, key: &str) -> SessionHandle {
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let (actor, sender) = SessionActor::new(
            key.to_string(),
            self.storage.clone(),
            self.config.debounce_window(),
            self.config.idle_eviction(),
        );
        let handle = SessionHandle::new(Arc::from(key), instance, sender);

        let sessions = self.sessions.clone();
        let owned_key = key.to_string();
        let evict = move || {
            let removed = sessions
                .remove_if(&owned_key, |_, handle| handle.instance() == instance)
                .is_some();
            if removed {
                debug!(session = %owned_key, instance, "evicting idle session actor");
            }
            removed
        };

        tokio::spawn(actor.run(evict));
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::session_store::{SessionStore, memory::MemorySessionStore};
    use crate::dao::models::{PendingWriteEntity, SessionStateEntity};

    async fn hub(idle: Option<Duration>) -> (SessionHub, MemorySessionStore) {
        let store = MemorySessionStore::new();
        let storage = Arc::new(StorageSlot::new());
        storage.install(Arc::new(store.clone())).await;
        let config = Arc::new(AppConfig::new(Duration::from_secs(5), idle));
        (SessionHub::new(storage, config), store)
    }

    #[tokio::test]
    async fn same_key_resolves_to_one_actor() {
        let (hub, _store) = hub(None).await;

        let first = hub.resolve("alice");
        let second = hub.resolve("alice");
        let other = hub.resolve("bob");

        assert_eq!(first.instance(), second.instance());
        assert_ne!(first.instance(), other.instance());
        assert_eq!(hub.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_actor_is_evicted_and_respawned() {
        let (hub, _store) = hub(Some(Duration::from_secs(30))).await;

        let first = hub.resolve("alice");
        first.snapshot().await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(hub.is_empty());
        assert!(first.is_closed());

        let second = hub.resolve("alice");
        assert_ne!(first.instance(), second.instance());
        assert!(second.snapshot().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_alarms_are_rearmed() {
        let (hub, store) = hub(None).await;
        store
            .save_pending_write(
                "alice".into(),
                PendingWriteEntity {
                    master_id: "u1".into(),
                    song_id: "amazing-grace".into(),
                    queued_at: std::time::SystemTime::now(),
                },
            )
            .await
            .unwrap();
        store
            .set_alarm("alice".into(), std::time::SystemTime::now())
            .await
            .unwrap();

        hub.rearm_pending_alarms().await;
        assert_eq!(hub.len(), 1);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].song_id, "amazing-grace");
    }

    #[tokio::test]
    async fn actors_started_before_storage_load_state_on_reload() {
        let store = MemorySessionStore::new();
        store
            .save_state(
                "alice".into(),
                SessionStateEntity {
                    song_id: Some("amazing-grace".into()),
                    transpose_steps: Some(3),
                    master_id: Some("u0".into()),
                    master_nickname: Some("alice".into()),
                    master_avatar: None,
                    updated_at: std::time::SystemTime::now(),
                },
            )
            .await
            .unwrap();
        let storage = Arc::new(StorageSlot::new());
        let config = Arc::new(AppConfig::new(Duration::from_secs(5), None));
        let hub = SessionHub::new(storage.clone(), config);

        let handle = hub.resolve("alice");
        assert_eq!(handle.snapshot().await.unwrap().song_id, None);

        storage.install(Arc::new(store.clone())).await;
        hub.reload_sessions();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.song_id.as_deref(), Some("amazing-grace"));
        assert_eq!(snapshot.transpose_steps, Some(3));
        let persisted = store.load_state("alice".into()).await.unwrap().unwrap();
        assert_eq!(persisted.master_id.as_deref(), Some("u0"));
    }
}
