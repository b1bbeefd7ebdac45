use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the song sheet sync server.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::session_snapshot,
        crate::routes::session::session_ws,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::SessionSnapshotResponse,
            crate::dto::ws::SessionInboundMessage,
            crate::dto::ws::UpdateSongPayload,
            crate::dto::ws::SessionOutboundMessage,
            crate::dto::ws::SyncPayload,
            crate::dto::ws::UpdateOkPayload,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "sessions", description = "Live song selection sessions and their WebSocket"),
    )
)]
pub struct ApiDoc;
