//! Error types for karaoke-server
//!
//! Every handler error becomes `{"error": {"code", "message"}}` with a fixed
//! code per variant. Internal failures log their detail and answer with a
//! generic message; backend diagnostics never reach the client.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::FailureClass;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No `file` field in the multipart body (400)
    #[error("No file part in the request")]
    MissingFile,

    /// Declared filename empty or sanitized to nothing (400)
    #[error("No selected file")]
    EmptyFilename,

    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured limit (413)
    #[error("Upload exceeds {0} bytes")]
    PayloadTooLarge(u64),

    /// Extension or content not an accepted audio format (415)
    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict (409), e.g. cancelling a job that already started
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Queue admission refused (503)
    #[error("Job queue is full, try again later")]
    QueueFull,

    /// Separation failed; only the opaque code is reported
    #[error("Separation failed for job {job_id}: {code}")]
    Separation {
        job_id: Uuid,
        code: String,
        class: FailureClass,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// karaoke-common error
    #[error("Common error: {0}")]
    Common(#[from] karaoke_common::Error),
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        match err.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(0),
            StatusCode::INTERNAL_SERVER_ERROR => ApiError::Internal(err.body_text()),
            _ => ApiError::BadRequest(err.body_text()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile | ApiError::EmptyFilename | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Separation { class, .. } => match class {
                FailureClass::Transient => StatusCode::SERVICE_UNAVAILABLE,
                FailureClass::Permanent => StatusCode::UNPROCESSABLE_ENTITY,
            },
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingFile => "MISSING_FILE",
            ApiError::EmptyFilename => "EMPTY_FILENAME",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMedia(_) => "UNSUPPORTED_MEDIA",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::QueueFull => "QUEUE_FULL",
            ApiError::Separation { class, .. } => match class {
                FailureClass::Transient => "SEPARATION_UNAVAILABLE",
                FailureClass::Permanent => "SEPARATION_FAILED",
            },
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Common(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let body = match &self {
            ApiError::Separation {
                job_id,
                code: backend_code,
                class,
            } => json!({
                "error": {
                    "code": code,
                    "message": format!("Separation failed ({})", backend_code),
                },
                "job_id": job_id,
                "backend_code": backend_code,
                "retryable": class.is_retryable(),
            }),
            ApiError::QueueFull => json!({
                "error": { "code": code, "message": self.to_string() },
                "retryable": true,
            }),
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Common(_) => {
                tracing::error!("{}", self);
                json!({
                    "error": { "code": code, "message": "Internal server error" },
                })
            }
            ApiError::PayloadTooLarge(0) => json!({
                "error": { "code": code, "message": "Upload too large" },
            }),
            _ => json!({
                "error": { "code": code, "message": self.to_string() },
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_status_follows_class() {
        let transient = ApiError::Separation {
            job_id: Uuid::new_v4(),
            code: "TIMEOUT".to_string(),
            class: FailureClass::Transient,
        };
        assert_eq!(transient.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(transient.code(), "SEPARATION_UNAVAILABLE");

        let permanent = ApiError::Separation {
            job_id: Uuid::new_v4(),
            code: "DECODE_FAILED".to_string(),
            class: FailureClass::Permanent,
        };
        assert_eq!(permanent.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(permanent.code(), "SEPARATION_FAILED");
    }

    #[tokio::test]
    async fn internal_detail_is_not_returned() {
        use http_body_util::BodyExt;

        let response = ApiError::Internal("/secret/path exploded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!body.contains("/secret/path"));
        assert!(body.contains("INTERNAL_ERROR"));

        let io = ApiError::Io(std::io::Error::other("/secret/io/path"));
        let bytes = io.into_response().into_body().collect().await.unwrap().to_bytes();
        assert!(!String::from_utf8_lossy(&bytes).contains("/secret/io/path"));
    }

    #[test]
    fn client_errors_map_to_400() {
        assert_eq!(ApiError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::EmptyFilename.code(), "EMPTY_FILENAME");
        assert_eq!(ApiError::QueueFull.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
