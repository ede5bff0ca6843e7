use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ballast_scheduler::SchedulerError;
use serde_json::json;

/// Failure of an extender request, rendered as a Kubernetes Status
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request or extender contract violation (400)
    BadRequest(String),

    /// Internal server error (500)
    Internal(String),
}

/// Result of an extender handler
pub type Result<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "apiVersion": "v1",
            "kind": "Status",
            "status": "Failure",
            "message": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        use ballast_core::BallastError;

        match err {
            SchedulerError::InvalidRequest { .. } => ApiError::BadRequest(err.to_string()),
            SchedulerError::CoreError(BallastError::InvalidResource { .. }) => {
                ApiError::BadRequest(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {}", err))
    }
}
