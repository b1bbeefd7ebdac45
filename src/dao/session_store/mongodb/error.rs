use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB backend, converted into [`StorageError`](crate::dao::storage::StorageError) at the trait boundary.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to read `{collection}` record for session `{key}`")]
    Load {
        collection: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write `{collection}` record for session `{key}`")]
    Save {
        collection: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete `{collection}` record for session `{key}`")]
    Delete {
        collection: &'static str,
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list pending alarms")]
    ListAlarms {
        #[source]
        source: MongoError,
    },
}
