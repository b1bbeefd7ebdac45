/// Database model definitions.
pub mod models;
/// Session state, pending write, alarm and history persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
