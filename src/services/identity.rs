//! Decides which role a WebSocket client gets before the upgrade is accepted.

use axum::http::HeaderMap;

use crate::state::session::MasterIdentity;

/// Header carrying the authenticated user's stable identifier.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated user's public nickname.
pub const USER_NICKNAME_HEADER: &str = "x-user-nickname";
/// Header carrying the authenticated user's avatar URL.
pub const USER_AVATAR_HEADER: &str = "x-user-avatar";

/// Role granted to a connecting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectRole {
    /// Entitled to drive the session; identity is trusted as-is.
    Master(MasterIdentity),
    /// Read-only listener.
    Follower,
}

/// Resolves callers to a role for a given session key.
pub trait IdentityProvider: Send + Sync {
    /// Role of the caller described by `headers` in session `session_key`.
    fn resolve_role(&self, session_key: &str, headers: &HeaderMap) -> ConnectRole;
}

/// Trusts the user headers injected by the authenticating reverse proxy.
///
/// The session key is the master's nickname, so a caller is master of the
/// session named after its own nickname and a follower everywhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustedHeaderIdentity;

impl IdentityProvider for TrustedHeaderIdentity {
    fn resolve_role(&self, session_key: &str, headers: &HeaderMap) -> ConnectRole {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match (header(USER_ID_HEADER), header(USER_NICKNAME_HEADER)) {
            (Some(id), Some(nickname)) if nickname == session_key => {
                ConnectRole::Master(MasterIdentity {
                    id,
                    nickname,
                    avatar: header(USER_AVATAR_HEADER),
                })
            }
            _ => ConnectRole::Follower,
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn owner_of_the_nickname_is_master() {
        let role = TrustedHeaderIdentity.resolve_role(
            "alice",
            &headers(&[
                (USER_ID_HEADER, "u1"),
                (USER_NICKNAME_HEADER, "alice"),
                (USER_AVATAR_HEADER, "https://cdn.example/alice.png"),
            ]),
        );
        assert_eq!(
            role,
            ConnectRole::Master(MasterIdentity {
                id: "u1".into(),
                nickname: "alice".into(),
                avatar: Some("https://cdn.example/alice.png".into()),
            })
        );
    }

    #[test]
    fn other_users_and_anonymous_callers_follow() {
        let provider = TrustedHeaderIdentity;
        assert_eq!(
            provider.resolve_role(
                "alice",
                &headers(&[(USER_ID_HEADER, "u2"), (USER_NICKNAME_HEADER, "bob")])
            ),
            ConnectRole::Follower
        );
        assert_eq!(
            provider.resolve_role("alice", &headers(&[(USER_NICKNAME_HEADER, "alice")])),
            ConnectRole::Follower
        );
        assert_eq!(
            provider.resolve_role("alice", &HeaderMap::new()),
            ConnectRole::Follower
        );
    }
}
