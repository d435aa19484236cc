use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::error::TransportError;

/// Errors surfaced by room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Join targeted a room with no room row and no participant rows.
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    /// Create targeted an id that is already in use.
    #[error("room `{0}` already exists")]
    RoomAlreadyExists(String),
    /// Supplied PIN does not match the one on record.
    #[error("invalid admin PIN")]
    InvalidAdminPin,
    /// Admin-only command issued by a regular participant.
    #[error("only the room admin can {0}")]
    NotAdmin(&'static str),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation requires an active membership.
    #[error("not joined to any room")]
    NotJoined,
    /// Transport failure on an awaited operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result alias for room operations.
pub type RoomResult<T> = Result<T, RoomError>;

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Relay-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Backing store unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Conflict(message) => AppError::Conflict(message),
            TransportError::Unavailable { .. } => AppError::ServiceUnavailable(err.to_string()),
            TransportError::Rejected { .. } | TransportError::Decode { .. } => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
