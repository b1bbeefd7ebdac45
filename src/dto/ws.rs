use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

/// Why an inbound frame was discarded.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
/// Messages accepted from session WebSocket clients.
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionInboundMessage {
    /// Keepalive, answered with `pong`.
    Ping,
    /// Master-only song selection.
    UpdateSong(UpdateSongPayload),
    /// Any other `type`, ignored.
    #[serde(other)]
    Unknown,
}

impl SessionInboundMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(text)?;
        if let Self::UpdateSong(payload) = &message {
            payload.validate()?;
        }
        Ok(message)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Song selection pushed by the master.
pub struct UpdateSongPayload {
    /// `null` clears the selection.
    #[validate(length(min = 1, max = 256))]
    pub song_id: Option<String>,
    /// Semitone offset; omitted means untransposed.
    #[serde(default)]
    #[validate(range(min = -11, max = 11))]
    pub transpose_steps: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
/// Messages pushed by the server to session WebSocket clients.
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionOutboundMessage {
    /// Full session state, sent on connect and after every master update.
    Sync(SyncPayload),
    /// Reply to `ping`.
    Pong,
    /// Acknowledgement sent to the master only.
    UpdateOk(UpdateOkPayload),
    /// Sent to a master socket right before it is closed by a takeover.
    MasterReplaced,
}

/// Full session state pushed to every socket after a change.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// `null` when no song is selected.
    pub song_id: Option<String>,
    /// Semitone offset paired with `song_id`.
    pub transpose_steps: Option<i32>,
    /// Avatar URL of the last master.
    pub master_avatar: Option<String>,
    /// Nickname of the last master.
    pub master_nickname: Option<String>,
    /// Identity of the last master.
    pub master_id: Option<String>,
}

/// Acknowledgement sent to the master after an accepted `update-song`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOkPayload {
    /// Number of non-master sockets currently attached.
    pub connected_clients: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn update_song_parses_camel_case_fields() {
        let message = SessionInboundMessage::from_json_str(
            r#"{"type":"update-song","songId":"amazing-grace","transposeSteps":-2}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            SessionInboundMessage::UpdateSong(UpdateSongPayload {
                song_id: Some("amazing-grace".into()),
                transpose_steps: Some(-2),
            })
        );
    }

    #[test]
    fn update_song_without_transpose_is_accepted() {
        let message =
            SessionInboundMessage::from_json_str(r#"{"type":"update-song","songId":"a"}"#).unwrap();
        assert_eq!(
            message,
            SessionInboundMessage::UpdateSong(UpdateSongPayload {
                song_id: Some("a".into()),
                transpose_steps: None,
            })
        );
    }

    #[test]
    fn out_of_range_transpose_is_rejected() {
        let err = SessionInboundMessage::from_json_str(
            r#"{"type":"update-song","songId":"a","transposeSteps":40}"#,
        )
        .unwrap_err();
        assert!(matches!(err, InboundError::Invalid(_)));
    }

    #[test]
    fn garbage_is_malformed_and_unknown_types_are_tolerated() {
        assert!(matches!(
            SessionInboundMessage::from_json_str("not json"),
            Err(InboundError::Malformed(_))
        ));
        assert_eq!(
            SessionInboundMessage::from_json_str(r#"{"type":"dance"}"#).unwrap(),
            SessionInboundMessage::Unknown
        );
    }

    #[test]
    fn outbound_messages_match_wire_format() {
        let sync = SessionOutboundMessage::Sync(SyncPayload {
            song_id: None,
            transpose_steps: None,
            master_avatar: None,
            master_nickname: Some("alice".into()),
            master_id: Some("u1".into()),
        });
        assert_eq!(
            serde_json::to_value(&sync).unwrap(),
            json!({
                "type": "sync",
                "songId": null,
                "transposeSteps": null,
                "masterAvatar": null,
                "masterNickname": "alice",
                "masterId": "u1",
            })
        );
        assert_eq!(
            serde_json::to_value(SessionOutboundMessage::UpdateOk(UpdateOkPayload {
                connected_clients: 3
            }))
            .unwrap(),
            json!({"type": "update-ok", "connectedClients": 3})
        );
        assert_eq!(
            serde_json::to_value(SessionOutboundMessage::MasterReplaced).unwrap(),
            json!({"type": "master-replaced"})
        );
        assert_eq!(
            serde_json::to_value(SessionOutboundMessage::Pong).unwrap(),
            json!({"type": "pong"})
        );
    }
}
