use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict("Email already registered".to_string())
            }
            sqlx::Error::RowNotFound => AppError::NotFound("User not found".to_string()),
            _ => AppError::Database(err),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Sync(e) => match e {
                SyncError::SheetNotFound(_) | SyncError::FileNotFound(_) => StatusCode::NOT_FOUND,
                SyncError::AlreadyExists(_) => StatusCode::CONFLICT,
                SyncError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
                SyncError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                SyncError::Authentication(_)
                | SyncError::Connection(_)
                | SyncError::DataFormat(_)
                | SyncError::Download(_)
                | SyncError::Upload(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Message safe to show to API clients.
    fn detail(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::InvalidInput(msg)
            | AppError::Unauthorized(msg) => msg.clone(),
            AppError::Database(_) | AppError::Internal(_) | AppError::Sync(SyncError::Io(_)) => {
                "Internal server error".to_string()
            }
            AppError::Sync(
                e @ (SyncError::SheetNotFound(_)
                | SyncError::FileNotFound(_)
                | SyncError::AlreadyExists(_)
                | SyncError::NotConfigured(_)),
            ) => e.to_string(),
            // Upstream failures carry remote bodies and URLs; those stay in the log.
            AppError::Sync(SyncError::Authentication(_)) => {
                "Upstream authentication failed".to_string()
            }
            AppError::Sync(SyncError::Connection(_)) => "Upstream service unavailable".to_string(),
            AppError::Sync(SyncError::DataFormat(_)) => {
                "Upstream returned unexpected data".to_string()
            }
            AppError::Sync(SyncError::Download(_)) => "Download failed".to_string(),
            AppError::Sync(SyncError::Upload(_)) => "Upload failed".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = Json(json!({ "detail": self.detail() }));
        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response();
        }
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
