//! Library crate for songsheet-sync, exposing modules for binaries and integration tests.

/// Application configuration loaded at startup.
pub mod config;
/// Persistence layer and storage backends.
pub mod dao;
/// Wire and HTTP payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routes.
pub mod routes;
/// Session actors, sockets and background tasks.
pub mod services;
/// Shared application state.
pub mod state;
