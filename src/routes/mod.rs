use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::services::pipeline::SubmitError;

pub mod auth;
pub mod health;
pub mod metrics;
pub mod processing;

/// API-facing error taxonomy. Internal details are logged at the point of
/// failure, never leaked in the response body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Missing or invalid credentials")]
    Unauthorized,

    #[error("Job not found")]
    NotFound,

    #[error("Processing queue is full, try again later")]
    QueueFull,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    /// Log an unexpected failure and collapse it to a generic 500.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "request failed");
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(msg) => ApiError::Validation(msg),
            SubmitError::QueueFull => ApiError::QueueFull,
            SubmitError::Storage(e) => ApiError::internal(e),
            SubmitError::Persistence(e) => ApiError::internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                ApiError::Validation("bad file".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ApiError::NotFound, StatusCode::NOT_FOUND),
            (ApiError::QueueFull, StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err: ApiError =
            SubmitError::Validation("Only JPEG and PNG files are allowed".to_string()).into();
        assert!(matches!(err, ApiError::Validation(_)));

        let err: ApiError = SubmitError::QueueFull.into();
        assert!(matches!(err, ApiError::QueueFull));
    }
}
