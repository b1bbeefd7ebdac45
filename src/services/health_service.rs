use tracing::{debug, warn};

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report storage status and the number of running session actors.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.storage().require().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let sessions = state.sessions().len();
    debug!(sessions, "health check");
    if state.is_degraded() {
        HealthResponse::degraded(sessions)
    } else {
        HealthResponse::ok(sessions)
    }
}
