use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::repository::RepoError;

/// AppError
///
/// The request-terminal failure taxonomy. Every variant maps to exactly one HTTP status and
/// is rendered as a structured `{ message, status }` body. Internal detail (database errors,
/// token validation internals) is logged where it occurs and never crosses the boundary.
#[derive(Debug, Error)]
pub enum AppError {
    /// No credential, an invalid one, or an expired one.
    #[error("{0}")]
    Unauthenticated(String),
    /// Authenticated, but the coarse permission set or the ownership rule denies the action.
    #[error("{0}")]
    Forbidden(String),
    /// The resource is absent, or its existence is intentionally hidden from the caller.
    #[error("{0}")]
    NotFound(String),
    /// A unique key (the username) is already taken.
    #[error("{0}")]
    Conflict(String),
    /// Malformed or incomplete input.
    #[error("{0}")]
    Validation(String),
    /// Store failure. The message is generic on purpose; the cause is logged by the caller.
    #[error("Internal Server Error")]
    Internal,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The single 401 used by the authentication gate and the login flow, so that a bad
    /// signature, an expired token, an unknown user and a wrong secret are indistinguishable.
    pub fn invalid_credentials() -> Self {
        AppError::Unauthenticated("Invalid credentials".to_string())
    }

    pub fn missing_token() -> Self {
        AppError::Unauthenticated("Authentication required".to_string())
    }

    pub fn insufficient_permissions() -> Self {
        AppError::Forbidden("Insufficient permissions".to_string())
    }
}

/// ErrorBody
///
/// Wire shape of every error response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub message: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Conflict(what) => AppError::Conflict(what),
            RepoError::Database(e) => {
                tracing::error!("repository error: {:?}", e);
                AppError::Internal
            }
            RepoError::Corrupt(detail) => {
                tracing::error!("corrupt record: {}", detail);
                AppError::Internal
            }
        }
    }
}

/// TokenError
///
/// Failure kinds of the token codec. The authentication gate collapses both into a single
/// `AppError::Unauthenticated`; the distinction only exists for logging and tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signature or structure is invalid")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token could not be signed")]
    Signing,
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        tracing::error!("token issue failed: {}", err);
        AppError::Internal
    }
}

/// ConfigError
///
/// Raised by `AppConfig::load` when a variable required for the current environment is
/// missing or unparsable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in production")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}
