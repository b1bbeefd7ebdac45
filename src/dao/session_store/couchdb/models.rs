use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    dao::models::{HistoryEntryEntity, PendingWriteEntity, SessionStateEntity},
    dto::format_system_time,
};

/// Document id prefixes; every session owns one id per prefix (history ids add a uuid).
pub const SESSION_PREFIX: &str = "session::";
pub const PENDING_PREFIX: &str = "pending::";
pub const ALARM_PREFIX: &str = "alarm::";
pub const HISTORY_PREFIX: &str = "history::";
/// Upper bound appended to a prefix for `_all_docs` range scans.
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Minimal view used to fetch the current revision before an update or delete.
#[derive(Debug, Deserialize)]
pub struct RevisionOnly {
    #[serde(rename = "_rev")]
    pub rev: String,
}

/// Current session state, one per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub state: SessionStateEntity,
}

impl CouchSessionDocument {
    pub fn new(key: &str, state: SessionStateEntity) -> Self {
        Self {
            id: session_doc_id(key),
            rev: None,
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchPendingWriteDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub pending: PendingWriteEntity,
}

impl CouchPendingWriteDocument {
    pub fn new(key: &str, pending: PendingWriteEntity) -> Self {
        Self {
            id: pending_doc_id(key),
            rev: None,
            pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchAlarmDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub deadline: SystemTime,
}

impl CouchAlarmDocument {
    pub fn new(key: &str, deadline: SystemTime) -> Self {
        Self {
            id: alarm_doc_id(key),
            rev: None,
            deadline,
        }
    }

    /// Session key encoded in the document ID.
    pub fn session_key(&self) -> Option<&str> {
        self.id.strip_prefix(ALARM_PREFIX)
    }
}

/// Append-only history document; the readable timestamp eases ad-hoc Mango queries.
#[derive(Debug, Clone, Serialize)]
pub struct CouchHistoryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(flatten)]
    pub entry: HistoryEntryEntity,
    pub recorded_at_rfc3339: String,
}

impl From<HistoryEntryEntity> for CouchHistoryDocument {
    fn from(entry: HistoryEntryEntity) -> Self {
        let recorded_at_rfc3339 = format_system_time(entry.recorded_at);
        Self {
            id: format!("{HISTORY_PREFIX}{}::{}", entry.session_key, Uuid::new_v4()),
            entry,
            recorded_at_rfc3339,
        }
    }
}

pub fn session_doc_id(key: &str) -> String {
    format!("{SESSION_PREFIX}{key}")
}

pub fn pending_doc_id(key: &str) -> String {
    format!("{PENDING_PREFIX}{key}")
}

pub fn alarm_doc_id(key: &str) -> String {
    format!("{ALARM_PREFIX}{key}")
}
