use reqwest::StatusCode;
use thiserror::Error;

pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures talking to CouchDB. `target` is the database name or the document path involved.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build CouchDB HTTP client")]
    Client {
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB request to `{target}` failed")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB answered {status} for `{target}`")]
    Status { target: String, status: StatusCode },
    #[error("unreadable CouchDB response body for `{target}`")]
    Decode {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("CouchDB document `{doc_id}` does not match the session schema")]
    Document {
        doc_id: String,
        #[source]
        source: serde_json::Error,
    },
    /// Listed document id lacks the expected key prefix.
    #[error("invalid document ID `{doc_id}`")]
    InvalidDocId { doc_id: String },
}
