use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, services::gate::GateError, state::session::SessionError};

/// Errors produced by engine operations; each maps to a wire error code.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The bearer credential was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// No session matches the given id or join code.
    #[error("session not found")]
    SessionNotFound,
    /// A new player tried to join after the game started.
    #[error("session already started")]
    SessionAlreadyStarted,
    /// A host-only command was issued by someone else.
    #[error("only the host may issue this command")]
    NotHost,
    /// Command issued in the wrong lifecycle phase or for the wrong question.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The player already answered the current question.
    #[error("question already answered")]
    AlreadyAnswered,
    /// Reported elapsed time exceeds the question limit.
    #[error("answer submitted after the time limit")]
    TimeExpired,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Persistence did not answer in time, even after retries.
    #[error("persistence timed out")]
    PersistenceTimeout,
    /// Persistence kept rejecting writes as stale, even after retries.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unexpected failure; details are logged, never sent to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable code exposed in response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            ServiceError::SessionNotFound => "SESSION_NOT_FOUND",
            ServiceError::SessionAlreadyStarted => "SESSION_ALREADY_STARTED",
            ServiceError::NotHost => "NOT_HOST",
            ServiceError::InvalidState(_) => "INVALID_STATE",
            ServiceError::AlreadyAnswered => "ALREADY_ANSWERED",
            ServiceError::TimeExpired => "TIME_EXPIRED",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
            ServiceError::PersistenceTimeout => "PERSISTENCE_TIMEOUT",
            ServiceError::PersistenceConflict(_) => "PERSISTENCE_CONFLICT",
            ServiceError::Unavailable(_) | ServiceError::Degraded => "UNAVAILABLE",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether the same command may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::PersistenceTimeout | ServiceError::PersistenceConflict(_)
        )
    }

    /// Message safe to show to clients.
    pub fn client_message(&self) -> String {
        match self {
            ServiceError::Internal(_) => "internal error".into(),
            ServiceError::Unavailable(_) => "storage unavailable".into(),
            ServiceError::PersistenceConflict(_) => "concurrent update, please retry".into(),
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { message } => ServiceError::PersistenceConflict(message),
            unavailable @ StorageError::Unavailable { .. } => ServiceError::Unavailable(unavailable),
        }
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionAlreadyStarted => ServiceError::SessionAlreadyStarted,
            SessionError::NotHost => ServiceError::NotHost,
            SessionError::InvalidState(message) => ServiceError::InvalidState(message),
            SessionError::AlreadyAnswered => ServiceError::AlreadyAnswered,
            SessionError::TimeExpired => ServiceError::TimeExpired,
            SessionError::InvalidInput(message) => ServiceError::InvalidInput(message),
        }
    }
}

impl From<GateError> for ServiceError {
    fn from(err: GateError) -> Self {
        ServiceError::AuthenticationFailed(err.to_string())
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Caller is authenticated but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error")]
    Internal,
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.client_message();
        match err {
            ServiceError::AuthenticationFailed(_) => AppError::Unauthorized(message),
            ServiceError::NotHost => AppError::Forbidden(message),
            ServiceError::SessionNotFound => AppError::NotFound(message),
            ServiceError::InvalidInput(_) => AppError::BadRequest(message),
            ServiceError::SessionAlreadyStarted
            | ServiceError::InvalidState(_)
            | ServiceError::AlreadyAnswered
            | ServiceError::TimeExpired
            | ServiceError::PersistenceConflict(_) => AppError::Conflict(message),
            ServiceError::PersistenceTimeout
            | ServiceError::Unavailable(_)
            | ServiceError::Degraded => AppError::ServiceUnavailable(message),
            ServiceError::Internal(_) => AppError::Internal,
        }
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        AppError::Unauthorized(err.to_string())
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
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
