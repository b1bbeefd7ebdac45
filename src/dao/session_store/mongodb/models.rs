use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

use crate::dao::models::{HistoryEntryEntity, PendingWriteEntity, SessionStateEntity};

/// Current session state keyed by session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    key: String,
    song_id: Option<String>,
    transpose_steps: Option<i32>,
    master_id: Option<String>,
    master_nickname: Option<String>,
    master_avatar: Option<String>,
    updated_at: DateTime,
}

impl From<(String, SessionStateEntity)> for MongoSessionDocument {
    fn from((key, value): (String, SessionStateEntity)) -> Self {
        Self {
            key,
            song_id: value.song_id,
            transpose_steps: value.transpose_steps,
            master_id: value.master_id,
            master_nickname: value.master_nickname,
            master_avatar: value.master_avatar,
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoSessionDocument> for SessionStateEntity {
    fn from(value: MongoSessionDocument) -> Self {
        Self {
            song_id: value.song_id,
            transpose_steps: value.transpose_steps,
            master_id: value.master_id,
            master_nickname: value.master_nickname,
            master_avatar: value.master_avatar,
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPendingWriteDocument {
    #[serde(rename = "_id")]
    key: String,
    master_id: String,
    song_id: String,
    queued_at: DateTime,
}

impl From<(String, PendingWriteEntity)> for MongoPendingWriteDocument {
    fn from((key, value): (String, PendingWriteEntity)) -> Self {
        Self {
            key,
            master_id: value.master_id,
            song_id: value.song_id,
            queued_at: DateTime::from_system_time(value.queued_at),
        }
    }
}

impl From<MongoPendingWriteDocument> for PendingWriteEntity {
    fn from(value: MongoPendingWriteDocument) -> Self {
        Self {
            master_id: value.master_id,
            song_id: value.song_id,
            queued_at: value.queued_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAlarmDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub deadline: DateTime,
}

/// History documents get a server-assigned `_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoHistoryDocument {
    session_key: String,
    master_id: String,
    song_id: String,
    recorded_at: DateTime,
}

impl From<HistoryEntryEntity> for MongoHistoryDocument {
    fn from(value: HistoryEntryEntity) -> Self {
        Self {
            session_key: value.session_key,
            master_id: value.master_id,
            song_id: value.song_id,
            recorded_at: DateTime::from_system_time(value.recorded_at),
        }
    }
}

/// Filter matching the document stored under `key`.
pub fn doc_id(key: &str) -> Document {
    doc! {"_id": key}
}
