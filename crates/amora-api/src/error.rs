//! HTTP error type for the API handlers.
//!
//! Business-rule failures from the ledger map to distinct 4xx codes so a
//! client can tell "you cannot afford this" apart from a server fault.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use amora_db::DbError;
use amora_types::api::{ErrorBody, ErrorDetail};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid bearer token (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Authenticated but not allowed to see the resource (403)
    #[error("Access denied")]
    Forbidden,

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Request failed validation (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ledger, thread or like operation failed
    #[error(transparent)]
    Db(#[from] DbError),

    /// Anything else (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl ApiError {
    pub fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            Self::Db(e) => match e {
                DbError::ThreadNotFound => (StatusCode::NOT_FOUND, "thread_not_found"),
                DbError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
                DbError::NotParticipant => (StatusCode::FORBIDDEN, "not_participant"),
                DbError::SameUser => (StatusCode::BAD_REQUEST, "same_user"),
                DbError::UsernameTaken => (StatusCode::CONFLICT, "username_taken"),
                DbError::InvalidContent(_) => (StatusCode::BAD_REQUEST, "invalid_content"),
                DbError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
                DbError::BalanceOverflow { .. } => (StatusCode::BAD_REQUEST, "balance_overflow"),
                DbError::InsufficientBalance { .. } => {
                    (StatusCode::PAYMENT_REQUIRED, "insufficient_balance")
                }
                DbError::LikeLimitReached { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "like_limit_reached")
                }
                DbError::InvalidLike => (StatusCode::BAD_REQUEST, "invalid_like"),
                DbError::FaucetAlreadyClaimed => (StatusCode::CONFLICT, "faucet_already_claimed"),
                DbError::Corrupt(_) | DbError::LockPoisoned | DbError::Sqlite(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_type();

        // Never leak storage details to clients
        let message = if status.is_server_error() {
            error!("{}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail {
                kind: kind.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
