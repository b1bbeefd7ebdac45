use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{DateTime, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::info;

use super::{
    config::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAlarmDocument, MongoHistoryDocument, MongoPendingWriteDocument, MongoSessionDocument,
        doc_id,
    },
};
use crate::dao::{
    models::{HistoryEntryEntity, PendingWriteEntity, SessionStateEntity},
    session_store::SessionStore,
    storage::StorageResult,
};

const STATE_COLLECTION_NAME: &str = "session_states";
const PENDING_COLLECTION_NAME: &str = "session_pending_writes";
const ALARM_COLLECTION_NAME: &str = "session_alarms";
const HISTORY_COLLECTION_NAME: &str = "session_history";

/// [`SessionStore`] backed by MongoDB collections.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database = self.config.open_database().await?;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = config.open_database().await?;
        info!(database = %config.database_name(), "connected to MongoDB");

        let inner = Arc::new(MongoInner {
            database: RwLock::new(database),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection::<MongoHistoryDocument>(HISTORY_COLLECTION_NAME).await;
        let index = IndexModel::builder()
            .keys(doc! {"session_key": 1, "recorded_at": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("history_session_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: HISTORY_COLLECTION_NAME,
                index: "session_key,recorded_at",
                source,
            })?;

        Ok(())
    }

    async fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.inner.database.read().await.collection::<T>(name)
    }

    async fn load_state(&self, key: String) -> MongoResult<Option<SessionStateEntity>> {
        let collection = self
            .collection::<MongoSessionDocument>(STATE_COLLECTION_NAME)
            .await;
        let document = collection
            .find_one(doc_id(&key))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: STATE_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn save_state(&self, key: String, state: SessionStateEntity) -> MongoResult<()> {
        let collection = self
            .collection::<MongoSessionDocument>(STATE_COLLECTION_NAME)
            .await;
        let document: MongoSessionDocument = (key.clone(), state).into();
        collection
            .replace_one(doc_id(&key), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Save {
                collection: STATE_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(())
    }

    async fn load_pending_write(&self, key: String) -> MongoResult<Option<PendingWriteEntity>> {
        let collection = self
            .collection::<MongoPendingWriteDocument>(PENDING_COLLECTION_NAME)
            .await;
        let document = collection
            .find_one(doc_id(&key))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: PENDING_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn save_pending_write(&self, key: String, pending: PendingWriteEntity) -> MongoResult<()> {
        let collection = self
            .collection::<MongoPendingWriteDocument>(PENDING_COLLECTION_NAME)
            .await;
        let document: MongoPendingWriteDocument = (key.clone(), pending).into();
        collection
            .replace_one(doc_id(&key), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Save {
                collection: PENDING_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(())
    }

    async fn delete_by_key(&self, name: &'static str, key: String) -> MongoResult<()> {
        let collection = self.collection::<mongodb::bson::Document>(name).await;
        collection
            .delete_one(doc_id(&key))
            .await
            .map_err(|source| MongoDaoError::Delete {
                collection: name,
                key,
                source,
            })?;
        Ok(())
    }

    async fn load_alarm(&self, key: String) -> MongoResult<Option<SystemTime>> {
        let collection = self
            .collection::<MongoAlarmDocument>(ALARM_COLLECTION_NAME)
            .await;
        let document = collection
            .find_one(doc_id(&key))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: ALARM_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(document.map(|alarm| alarm.deadline.to_system_time()))
    }

    async fn set_alarm(&self, key: String, deadline: SystemTime) -> MongoResult<()> {
        let collection = self
            .collection::<MongoAlarmDocument>(ALARM_COLLECTION_NAME)
            .await;
        let document = MongoAlarmDocument {
            key: key.clone(),
            deadline: DateTime::from_system_time(deadline),
        };
        collection
            .replace_one(doc_id(&key), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Save {
                collection: ALARM_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(())
    }

    async fn list_alarms(&self) -> MongoResult<Vec<(String, SystemTime)>> {
        let collection = self
            .collection::<MongoAlarmDocument>(ALARM_COLLECTION_NAME)
            .await;
        let documents: Vec<MongoAlarmDocument> = collection
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListAlarms { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListAlarms { source })?;

        Ok(documents
            .into_iter()
            .map(|alarm| (alarm.key, alarm.deadline.to_system_time()))
            .collect())
    }

    async fn append_history(&self, entry: HistoryEntryEntity) -> MongoResult<()> {
        let collection = self
            .collection::<MongoHistoryDocument>(HISTORY_COLLECTION_NAME)
            .await;
        let key = entry.session_key.clone();
        let document: MongoHistoryDocument = entry.into();
        collection
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::Save {
                collection: HISTORY_COLLECTION_NAME,
                key,
                source,
            })?;
        Ok(())
    }
}

impl SessionStore for MongoSessionStore {
    fn load_state(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.load_state(key).await.map_err(Into::into) })
    }

    fn save_state(&self, key: String, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_state(key, state).await.map_err(Into::into) })
    }

    fn load_pending_write(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<Option<PendingWriteEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.load_pending_write(key).await.map_err(Into::into) })
    }

    fn save_pending_write(
        &self,
        key: String,
        pending: PendingWriteEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .save_pending_write(key, pending)
                .await
                .map_err(Into::into)
        })
    }

    fn delete_pending_write(&self, key: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_by_key(PENDING_COLLECTION_NAME, key)
                .await
                .map_err(Into::into)
        })
    }

    fn load_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SystemTime>>> {
        let store = self.clone();
        Box::pin(async move { store.load_alarm(key).await.map_err(Into::into) })
    }

    fn set_alarm(&self, key: String, deadline: SystemTime) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_alarm(key, deadline).await.map_err(Into::into) })
    }

    fn delete_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_by_key(ALARM_COLLECTION_NAME, key)
                .await
                .map_err(Into::into)
        })
    }

    fn list_alarms(&self) -> BoxFuture<'static, StorageResult<Vec<(String, SystemTime)>>> {
        let store = self.clone();
        Box::pin(async move { store.list_alarms().await.map_err(Into::into) })
    }

    fn append_history(&self, entry: HistoryEntryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.append_history(entry).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
