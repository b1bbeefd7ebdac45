//! In-process storage backend, used when no database is configured and by tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::dao::{
    models::{HistoryEntryEntity, PendingWriteEntity, SessionStateEntity},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("history log rejected the append")]
struct HistoryRejected;

/// Process-local store; clones share the same data.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    states: DashMap<String, SessionStateEntity>,
    pending: DashMap<String, PendingWriteEntity>,
    alarms: DashMap<String, SystemTime>,
    history: Mutex<Vec<HistoryEntryEntity>>,
    reject_history: AtomicBool,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every history entry appended so far, in append order.
    pub fn history(&self) -> Vec<HistoryEntryEntity> {
        self.inner
            .history
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Make subsequent history appends fail until toggled back.
    pub fn reject_history(&self, reject: bool) {
        self.inner.reject_history.store(reject, Ordering::SeqCst);
    }
}

impl SessionStore for MemorySessionStore {
    fn load_state(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>> {
        let state = self.inner.states.get(&key).map(|entry| entry.clone());
        Box::pin(async move { Ok(state) })
    }

    fn save_state(&self, key: String, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.states.insert(key, state);
        Box::pin(async { Ok(()) })
    }

    fn load_pending_write(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<Option<PendingWriteEntity>>> {
        let pending = self.inner.pending.get(&key).map(|entry| entry.clone());
        Box::pin(async move { Ok(pending) })
    }

    fn save_pending_write(
        &self,
        key: String,
        pending: PendingWriteEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.pending.insert(key, pending);
        Box::pin(async { Ok(()) })
    }

    fn delete_pending_write(&self, key: String) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.pending.remove(&key);
        Box::pin(async { Ok(()) })
    }

    fn load_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SystemTime>>> {
        let alarm = self.inner.alarms.get(&key).map(|entry| *entry);
        Box::pin(async move { Ok(alarm) })
    }

    fn set_alarm(&self, key: String, deadline: SystemTime) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.alarms.insert(key, deadline);
        Box::pin(async { Ok(()) })
    }

    fn delete_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.alarms.remove(&key);
        Box::pin(async { Ok(()) })
    }

    fn list_alarms(&self) -> BoxFuture<'static, StorageResult<Vec<(String, SystemTime)>>> {
        let alarms = self
            .inner
            .alarms
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        Box::pin(async move { Ok(alarms) })
    }

    fn append_history(&self, entry: HistoryEntryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if inner.reject_history.load(Ordering::SeqCst) {
                return Err(StorageError::unavailable(
                    "memory history log".into(),
                    HistoryRejected,
                ));
            }
            inner
                .history
                .lock()
                .map_err(|_| StorageError::Corrupted {
                    key: entry.session_key.clone(),
                    message: "history lock poisoned".into(),
                })?
                .push(entry);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn alarms_are_replaced_per_key() {
        let store = MemorySessionStore::new();
        let first = SystemTime::UNIX_EPOCH;
        let second = first + std::time::Duration::from_secs(5);

        store.set_alarm("alice".into(), first).await.unwrap();
        store.set_alarm("alice".into(), second).await.unwrap();

        let alarms = store.list_alarms().await.unwrap();
        assert_eq!(alarms, vec![("alice".to_string(), second)]);

        store.delete_alarm("alice".into()).await.unwrap();
        assert!(store.load_alarm("alice".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejected_history_appends_are_not_recorded() {
        let store = MemorySessionStore::new();
        store.reject_history(true);
        let entry = HistoryEntryEntity {
            session_key: "alice".into(),
            master_id: "u1".into(),
            song_id: "amazing-grace".into(),
            recorded_at: SystemTime::now(),
        };

        assert!(store.append_history(entry.clone()).await.is_err());
        store.reject_history(false);
        store.append_history(entry.clone()).await.unwrap();

        assert_eq!(store.history(), vec![entry]);
    }
}
