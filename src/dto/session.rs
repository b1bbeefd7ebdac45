use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{dto::validation::validate_session_key, state::session::SessionState};

/// Path parameters shared by the session routes.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Path)]
pub struct SessionKeyPath {
    /// Public nickname of the session's master.
    #[validate(custom(function = "validate_session_key"))]
    pub key: String,
}

/// One-shot view of a session returned by the snapshot route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshotResponse {
    /// Selected song, `null` when none.
    pub song_id: Option<String>,
    /// Semitone offset paired with `song_id`.
    pub transpose_steps: Option<i32>,
    /// Nickname of the last master.
    pub master_nickname: Option<String>,
    /// Avatar URL of the last master.
    pub master_avatar: Option<String>,
    /// Identity of the last master.
    pub master_id: Option<String>,
}

impl From<SessionState> for SessionSnapshotResponse {
    fn from(state: SessionState) -> Self {
        Self {
            song_id: state.song_id,
            transpose_steps: state.transpose_steps,
            master_nickname: state.master_nickname,
            master_avatar: state.master_avatar,
            master_id: state.master_id,
        }
    }
}
