use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;

use crate::dao::{
    models::{HistoryEntryEntity, PendingWriteEntity, SessionStateEntity},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        ALARM_PREFIX, AllDocsResponse, CouchAlarmDocument, CouchHistoryDocument,
        CouchPendingWriteDocument, CouchSessionDocument, END_SUFFIX, RevisionOnly, alarm_doc_id,
        pending_doc_id, session_doc_id,
    },
};

/// [`SessionStore`] backed by a CouchDB database over its HTTP API.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::Client { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .credentials
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.with_auth(self.client.request(method, url))
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                target: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::Transport {
                        target: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::Status {
                        target: database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::Status {
                target: database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                target: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::Decode {
                        target: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::Status {
                target: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn current_rev(&self, doc_id: &str) -> CouchResult<Option<String>> {
        Ok(self
            .get_document::<RevisionOnly>(doc_id)
            .await?
            .map(|doc| doc.rev))
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                target: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::Status {
                target: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    /// Delete a document if it exists; a missing document is not an error.
    async fn delete_document(&self, doc_id: &str) -> CouchResult<()> {
        let Some(rev) = self.current_rev(doc_id).await? else {
            return Ok(());
        };

        let response = self
            .request(Method::DELETE, doc_id)
            .query(&[("rev", rev)])
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                target: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            other => Err(CouchDaoError::Status {
                target: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{}\"", prefix)),
            ("endkey", format!("\"{}{}\"", prefix, END_SUFFIX)),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::Transport {
                target: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::Status {
                target: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::Decode {
                target: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc.map(|doc| (row.id, doc)))
            .map(|(id, doc)| {
                from_value(doc).map_err(|source| CouchDaoError::Document { doc_id: id, source })
            })
            .collect()
    }
}

impl SessionStore for CouchSessionStore {
    fn load_state(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchSessionDocument>(&session_doc_id(&key))
                .await?;
            Ok(doc.map(|doc| doc.state))
        })
    }

    fn save_state(&self, key: String, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut doc = CouchSessionDocument::new(&key, state);
            doc.rev = store.current_rev(&doc.id).await?;
            store.put_document(&doc.id, &doc).await.map_err(Into::into)
        })
    }

    fn load_pending_write(
        &self,
        key: String,
    ) -> BoxFuture<'static, StorageResult<Option<PendingWriteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchPendingWriteDocument>(&pending_doc_id(&key))
                .await?;
            Ok(doc.map(|doc| doc.pending))
        })
    }

    fn save_pending_write(
        &self,
        key: String,
        pending: PendingWriteEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut doc = CouchPendingWriteDocument::new(&key, pending);
            doc.rev = store.current_rev(&doc.id).await?;
            store.put_document(&doc.id, &doc).await.map_err(Into::into)
        })
    }

    fn delete_pending_write(&self, key: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_document(&pending_doc_id(&key))
                .await
                .map_err(Into::into)
        })
    }

    fn load_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<Option<SystemTime>>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = store
                .get_document::<CouchAlarmDocument>(&alarm_doc_id(&key))
                .await?;
            Ok(doc.map(|doc| doc.deadline))
        })
    }

    fn set_alarm(&self, key: String, deadline: SystemTime) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut doc = CouchAlarmDocument::new(&key, deadline);
            doc.rev = store.current_rev(&doc.id).await?;
            store.put_document(&doc.id, &doc).await.map_err(Into::into)
        })
    }

    fn delete_alarm(&self, key: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .delete_document(&alarm_doc_id(&key))
                .await
                .map_err(Into::into)
        })
    }

    fn list_alarms(&self) -> BoxFuture<'static, StorageResult<Vec<(String, SystemTime)>>> {
        let store = self.clone();
        Box::pin(async move {
            let docs = store
                .list_documents::<CouchAlarmDocument>(ALARM_PREFIX)
                .await?;
            let alarms: StorageResult<Vec<(String, SystemTime)>> = docs
                .into_iter()
                .map(|doc| match doc.session_key().map(str::to_string) {
                    Some(key) => Ok((key, doc.deadline)),
                    None => Err(StorageError::from(CouchDaoError::InvalidDocId {
                        doc_id: doc.id,
                    })),
                })
                .collect();
            alarms
        })
    }

    fn append_history(&self, entry: HistoryEntryEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc = CouchHistoryDocument::from(entry);
            store.put_document(&doc.id, &doc).await.map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .with_auth(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::Transport {
                    target: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::Status {
                    target: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
