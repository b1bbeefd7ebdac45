use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when a storage backend is installed and healthy, "degraded" otherwise.
    pub status: String,
    /// Session actors currently running on this instance.
    pub sessions: usize,
}

impl HealthResponse {
    /// Storage installed and healthy.
    pub fn ok(sessions: usize) -> Self {
        Self {
            status: "ok".to_string(),
            sessions,
        }
    }

    /// Running without a usable store.
    pub fn degraded(sessions: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            sessions,
        }
    }
}
