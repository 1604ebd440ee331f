use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::source::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Twitch API error: {0}")]
    TwitchApi(#[from] FetchError),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Failure of one streamer's refresh (or of a whole trigger run).
///
/// Per-streamer variants are contained by the orchestrator's fan-out; they are
/// logged and never reach sibling streamers.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Schedule fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Schedule store failed: {0}")]
    Store(#[source] AppError),

    #[error("Orchestration failed: {0}")]
    Orchestration(String),
}

impl From<AppError> for SyncError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::TwitchApi(e) => SyncError::Fetch(e),
            other => SyncError::Store(other),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Store(AppError::Database(err))
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Fetch(e) => AppError::TwitchApi(e),
            SyncError::Store(e) => e,
            SyncError::Orchestration(msg) => AppError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "Invalid or expired token".to_string(),
                )
            }
            AppError::TwitchApi(e) => {
                tracing::error!("Twitch API error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    "TWITCH_API_ERROR",
                    "Failed to communicate with Twitch".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
pub type SyncResult<T> = Result<T, SyncError>;
