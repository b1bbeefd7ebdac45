use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Failures surfaced by the service layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The backend call failed.
    #[error("storage unavailable")]
    Unavailable(#[from] StorageError),
    /// No backend installed, or the installed one is unhealthy.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// The session actor stopped before taking the request.
    #[error("session `{0}` is no longer running")]
    SessionClosed(String),
}

/// Errors rendered as HTTP responses with a `{ "message": ... }` body.
#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected input, rendered as `400`.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Storage or session temporarily unavailable, rendered as `503`.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {errors}"))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = match err {
            ServiceError::Unavailable(source) => source.to_string(),
            ServiceError::Degraded => "degraded mode".into(),
            ServiceError::SessionClosed(key) => format!("session `{key}` restarting"),
        };
        AppError::ServiceUnavailable(message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}
