use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Health check payload.
pub mod health;
/// Session REST payloads.
pub mod session;
/// Custom field validators.
pub mod validation;
/// WebSocket protocol messages.
pub mod ws;

/// Render a timestamp as RFC 3339 for logs and readable documents.
pub fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
