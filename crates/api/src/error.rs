//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifecycle::LifecycleError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": message }),
            ),
            ApiError::Lifecycle(LifecycleError::Rejected(rejection)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "error": rejection.to_string(),
                    "rejection": rejection,
                }),
            ),
            ApiError::Lifecycle(LifecycleError::CartNotFound(_)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::Lifecycle(LifecycleError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": self.to_string() }),
            ),
            ApiError::Lifecycle(err) if err.is_conflict() => {
                tracing::warn!(error = %err, "concurrent write to cart stream");
                (
                    StatusCode::CONFLICT,
                    serde_json::json!({ "error": err.to_string() }),
                )
            }
            ApiError::Lifecycle(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": err.to_string() }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
