//! Crate-wide error taxonomy
//!
//! Every operator-visible failure maps onto one of these kinds, each with a
//! stable code and an HTTP status. Subsystem errors convert into this type at
//! the API surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(..) => "not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Conflict(_) => "conflict",
            Error::Precondition(_) => "failed_precondition",
            Error::EngineUnavailable(_) => "engine_unavailable",
            Error::Timeout(_) => "timeout",
            Error::Cancelled => "cancelled",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether a retry without caller changes can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::EngineUnavailable(_) | Error::Timeout(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(..) => StatusCode::NOT_FOUND,
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Precondition(_) => StatusCode::PRECONDITION_FAILED,
            Error::EngineUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Cancelled => StatusCode::CONFLICT,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "code": self.code(),
            "message": self.to_string(),
        }));

        (self.status_code(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
