use axum::http::StatusCode;
use thiserror::Error;

/// Errors emitted by the relay store and correlator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("invalid request body: {reason}")]
    InvalidBody { reason: String },
    #[error("no pending request with id `{request_id}`")]
    NotFound { request_id: String },
    #[error("request `{request_id}` timed out after {timeout_secs}s without a response")]
    Timeout {
        request_id: String,
        timeout_secs: u64,
    },
    #[error("pending request `{request_id}` was dropped before it resolved")]
    Closed { request_id: String },
}

impl RelayError {
    pub fn invalid_body(reason: impl Into<String>) -> Self {
        Self::InvalidBody {
            reason: reason.into(),
        }
    }

    /// HTTP status delivered to the caller that triggered this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
            Self::Closed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
