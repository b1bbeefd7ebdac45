/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Debounced song history writes.
pub mod history_scheduler;
/// Role resolution for connecting clients.
pub mod identity;
/// Per-session actor owning state, sockets and history scheduling.
pub mod session_actor;
/// One-shot session reads.
pub mod snapshot_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// WebSocket connection pumping.
pub mod websocket_service;
