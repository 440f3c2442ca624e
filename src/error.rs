use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Registry database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error")]
    InternalServerError,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::StorageUnavailable(msg) => {
                error!("storage unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::Database(e) => {
                error!("registry database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error occurred".to_string(),
                )
            }
            AppError::Config(msg) => {
                error!("configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: error_message,
        });

        (status, body).into_response()
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unsupported blob schema version {found} (newest known: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Malformed blob: {0}")]
    Malformed(String),

    #[error("Lesson {lesson} references missing block {block}")]
    MissingBlock { lesson: String, block: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob transport error: {0}")]
    Transport(String),

    #[error("Blob store rejected request: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("Blob of {size} bytes exceeds the {limit} byte ceiling")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl From<reqwest::Error> for BlobError {
    fn from(err: reqwest::Error) -> Self {
        BlobError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Drive transport error: {0}")]
    Transport(String),

    #[error("Drive API error: {status} {body}")]
    Api { status: u16, body: String },

    #[error("Drive document could not be parsed: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DriveError {
    fn from(err: reqwest::Error) -> Self {
        DriveError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("Metadata store quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Metadata write precondition failed: {0}")]
    Conflict(String),

    #[error("Metadata store transport error: {0}")]
    Transport(String),

    #[error("Metadata document could not be decoded: {0}")]
    Decode(String),

    #[error("Pointer already holds a newer write: {0}")]
    Superseded(String),
}

impl MetaError {
    pub fn is_quota(&self) -> bool {
        matches!(self, MetaError::QuotaExhausted(_))
    }
}

impl From<reqwest::Error> for MetaError {
    fn from(err: reqwest::Error) -> Self {
        MetaError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for MetaError {
    fn from(err: serde_json::Error) -> Self {
        MetaError::Decode(err.to_string())
    }
}
