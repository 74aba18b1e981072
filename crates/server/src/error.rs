use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use posegate_core::pipeline::pose_service::ServiceError;

/// Failure of an HTTP request, rendered as `{"error": "..."}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No file uploaded")]
    MissingFile,
    #[error("Invalid upload: {0}")]
    Upload(#[from] MultipartError),
    #[error("Invalid upload: {0}")]
    NotMultipart(#[from] MultipartRejection),
    #[error("Invalid query: {0}")]
    Query(#[from] QueryRejection),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Processing failed: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            // 413 when the body limit cut the upload short.
            Self::Upload(e) => e.status(),
            Self::MissingFile | Self::NotMultipart(_) | Self::Query(_) => StatusCode::BAD_REQUEST,
            Self::Service(ServiceError::Decode(_)) => StatusCode::BAD_REQUEST,
            Self::Service(ServiceError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            Self::Service(ServiceError::Process(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Service(ServiceError::Process(e)) => format!("Processing failed: {e}"),
            other => other.to_string(),
        };
        if status.is_server_error() {
            log::error!("{message}");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
