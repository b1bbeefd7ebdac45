use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Durable copy of a session's live state, keyed by the session key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStateEntity {
    /// Song currently displayed by the session, if any.
    pub song_id: Option<String>,
    /// Transposition offset paired with `song_id`.
    pub transpose_steps: Option<i32>,
    /// Identity of the last master that drove the session.
    pub master_id: Option<String>,
    /// Public nickname of the master (also the session key).
    pub master_nickname: Option<String>,
    /// Avatar URL of the master, cosmetic only.
    pub master_avatar: Option<String>,
    /// Last time the record was written.
    pub updated_at: SystemTime,
}

/// History write waiting for the debounce alarm to fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingWriteEntity {
    /// Master that selected the song.
    pub master_id: String,
    /// Song selected by the master.
    pub song_id: String,
    /// When the master issued the update.
    pub queued_at: SystemTime,
}

/// Entry appended to the song history log once a selection settles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntryEntity {
    /// Session the selection happened in.
    pub session_key: String,
    /// Master credited with the selection.
    pub master_id: String,
    /// Song that was displayed.
    pub song_id: String,
    /// Flush time of the debounced write.
    pub recorded_at: SystemTime,
}
