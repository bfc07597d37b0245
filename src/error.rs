use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::crypto::webhook::Gateway;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A required secret or setting is missing. Raised by the operation that needs it.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The credential is malformed, tampered with, or uses an unsupported algorithm.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The credential is correctly signed but its expiry has passed.
    #[error("Token expired")]
    ExpiredToken,

    /// The session (or the resource addressed through it) does not exist or is not live.
    #[error("Resource not found")]
    NotFound,

    /// An inbound payment callback failed authentication.
    #[error("Signature mismatch for gateway {0}")]
    SignatureMismatch(Gateway),

    /// A background sweep failed. Logged and retried on the next tick.
    #[error("Sweep failed: {0}")]
    SweepFailure(String),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Repository(#[from] redis::RedisError),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Configuration(ref msg) => {
                tracing::error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Service misconfigured".to_string())
            }

            AppError::InvalidToken(ref msg) => {
                tracing::warn!("Invalid token: {}", msg);
                (StatusCode::UNAUTHORIZED, "Invalid token".to_string())
            }

            AppError::ExpiredToken => {
                tracing::debug!("Expired token presented");
                (StatusCode::UNAUTHORIZED, "Token expired".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::SignatureMismatch(gateway) => {
                tracing::warn!(%gateway, "Webhook rejected: signature mismatch");
                (StatusCode::UNAUTHORIZED, "Invalid signature".to_string())
            }

            AppError::SweepFailure(ref msg) => {
                tracing::error!("Sweep failure: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Repository(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
