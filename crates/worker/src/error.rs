//! Worker and API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use history::HistoryError;
use saga::{ErrorKind, HubError};

/// Failure to hand work to the hub shards.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Rejected(#[from] HubError),

    /// The shard owning the key has stopped.
    #[error("Saga worker is shutting down")]
    Unavailable,
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Worker(WorkerError),
    History(HistoryError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Worker(err) => worker_error_to_response(err),
            ApiError::History(err) => {
                tracing::error!(error = %err, "history query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn worker_error_to_response(err: WorkerError) -> (StatusCode, String) {
    let status = match &err {
        WorkerError::Unavailable | WorkerError::Rejected(HubError::RegistryFull(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        WorkerError::Rejected(hub) => match hub.kind() {
            ErrorKind::AlreadyExists | ErrorKind::InProgress => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RequestInvalid => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    (status, err.to_string())
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        ApiError::Worker(err)
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        ApiError::History(err)
    }
}
