use tracing::debug;

use crate::{
    dto::session::SessionSnapshotResponse, error::ServiceError, state::SharedState,
};

/// Read the current state of `key` through its actor.
///
/// An actor evicted between the lookup and the request is respawned once.
pub async fn session_snapshot(
    state: &SharedState,
    key: &str,
) -> Result<SessionSnapshotResponse, ServiceError> {
    let handle = state.sessions().resolve(key);
    let snapshot = match handle.snapshot().await {
        Err(ServiceError::SessionClosed(_)) => {
            debug!(session = %key, "session actor stopped during snapshot; retrying");
            state.sessions().resolve(key).snapshot().await?
        }
        other => other?,
    };

    Ok(snapshot.into())
}
