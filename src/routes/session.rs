use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use tracing::info;
use validator::Validate;

use crate::{
    dto::session::{SessionKeyPath, SessionSnapshotResponse},
    error::AppError,
    services::{identity::ConnectRole, snapshot_service, websocket_service},
    state::SharedState,
};

/// Routes exposing live sessions.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{key}", get(session_snapshot))
        .route("/sessions/{key}/ws", get(session_ws))
}

/// Return the current song selection and master of a session.
#[utoipa::path(
    get,
    path = "/sessions/{key}",
    tag = "sessions",
    params(SessionKeyPath),
    responses(
        (status = 200, description = "Current session state", body = SessionSnapshotResponse),
        (status = 400, description = "Invalid session key"),
        (status = 503, description = "Session temporarily unavailable")
    )
)]
pub async fn session_snapshot(
    State(state): State<SharedState>,
    Path(params): Path<SessionKeyPath>,
) -> Result<Json<SessionSnapshotResponse>, AppError> {
    params.validate()?;
    let snapshot = snapshot_service::session_snapshot(&state, &params.key).await?;
    Ok(Json(snapshot))
}

/// Upgrade to the session WebSocket.
///
/// Callers whose trusted nickname equals the session key join as master,
/// everyone else as follower.
#[utoipa::path(
    get,
    path = "/sessions/{key}/ws",
    tag = "sessions",
    params(SessionKeyPath),
    responses(
        (status = 101, description = "Switching protocols to WebSocket"),
        (status = 400, description = "Invalid session key")
    )
)]
pub async fn session_ws(
    State(state): State<SharedState>,
    Path(params): Path<SessionKeyPath>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    params.validate()?;
    let key = params.key;
    let role = state.identity().resolve_role(&key, &headers);
    if let ConnectRole::Master(identity) = &role {
        info!(session = %key, user = %identity.id, "master connecting");
    }

    Ok(ws.on_upgrade(move |socket| websocket_service::handle_socket(state, key, role, socket)))
}
