/// CouchDB backend.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// In-process backend.
pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;

use crate::dao::models::{HistoryEntryEntity, PendingWriteEntity, SessionStateEntity};
use crate::dao::storage::StorageResult;

/// Durable storage backing the session actors.
///
/// Every record is keyed by the session key. Each session owns at most one
/// state record, one pending history write and one alarm deadline; the history
/// log is append-only.
pub trait SessionStore: Send + Sync {
    fn load_state(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>>;
    fn save_state(&self, key: String, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn load_pending_write(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<Option<PendingWriteEntity>>>;
    fn save_pending_write(
        &self,
        key: String,
        pending: PendingWriteEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_pending_write(&self, key: String) -> BoxFuture<'static, StorageResult<()>>;
    fn load_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SystemTime>>>;
    /// Store the alarm deadline, replacing any earlier one for the same key.
    fn set_alarm(&self, key: String, deadline: SystemTime) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<()>>;
    /// List every persisted alarm so they can be re-armed after a restart.
    fn list_alarms(&self) -> BoxFuture<'static, StorageResult<Vec<(String, SystemTime)>>>;
    fn append_history(&self, entry: HistoryEntryEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
