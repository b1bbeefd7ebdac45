use std::time::SystemTime;

use crate::{
    dao::models::SessionStateEntity,
    dto::ws::{SessionOutboundMessage, SyncPayload},
};

/// Identity handed over by the upstream identity provider for a master connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterIdentity {
    /// Stable user identifier.
    pub id: String,
    /// Public nickname, equal to the session key.
    pub nickname: String,
    /// Avatar URL, cosmetic only.
    pub avatar: Option<String>,
}

/// Live state of one synchronization session.
///
/// `song_id` and `transpose_steps` only ever change together. The master fields
/// keep describing the last master after it disconnects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Selected song, if any.
    pub song_id: Option<String>,
    /// Semitone offset paired with `song_id`.
    pub transpose_steps: Option<i32>,
    /// Identity of the last master.
    pub master_id: Option<String>,
    /// Nickname of the last master.
    pub master_nickname: Option<String>,
    /// Avatar URL of the last master.
    pub master_avatar: Option<String>,
}

impl SessionState {
    /// Record the master that just connected.
    pub fn set_master(&mut self, identity: &MasterIdentity) {
        self.master_id = Some(identity.id.clone());
        self.master_nickname = Some(identity.nickname.clone());
        self.master_avatar = identity.avatar.clone();
    }

    /// Replace the song and its transposition in one step.
    pub fn select_song(&mut self, song_id: Option<String>, transpose_steps: i32) {
        self.song_id = song_id;
        self.transpose_steps = Some(transpose_steps);
    }

    /// Build the `sync` push carrying the whole state.
    pub fn sync_message(&self) -> SessionOutboundMessage {
        SessionOutboundMessage::Sync(SyncPayload {
            song_id: self.song_id.clone(),
            transpose_steps: self.transpose_steps,
            master_avatar: self.master_avatar.clone(),
            master_nickname: self.master_nickname.clone(),
            master_id: self.master_id.clone(),
        })
    }

    /// Persisted form, stamped with `updated_at`.
    pub fn to_entity(&self, updated_at: SystemTime) -> SessionStateEntity {
        SessionStateEntity {
            song_id: self.song_id.clone(),
            transpose_steps: self.transpose_steps,
            master_id: self.master_id.clone(),
            master_nickname: self.master_nickname.clone(),
            master_avatar: self.master_avatar.clone(),
            updated_at,
        }
    }
}

impl From<SessionStateEntity> for SessionState {
    fn from(value: SessionStateEntity) -> Self {
        Self {
            song_id: value.song_id,
            transpose_steps: value.transpose_steps,
            master_id: value.master_id,
            master_nickname: value.master_nickname,
            master_avatar: value.master_avatar,
        }
    }
}
