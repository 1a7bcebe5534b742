//! Error types for the facade server
//!
//! Every per-request failure is rendered as a Kubernetes `Status` object so
//! that client libraries can decode it the same way they would a real API
//! server error. Per-request errors never terminate the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Error type for request handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unknown path or missing resource instance
    #[error("{0}")]
    NotFound(String),

    /// Create collision (lease already present)
    #[error("{0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure on a lease update
    #[error("{0}")]
    Conflict(String),

    /// Malformed selector or request body
    #[error("{0}")]
    BadRequest(String),

    /// Unsupported verb on a known resource
    #[error("{0}")]
    MethodNotAllowed(String),

    /// Watch, or a bridge feature without a usable runtime socket
    #[error("{0}")]
    NotImplemented(String),

    /// Compose parse failure or unexpected filesystem error
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// 404 for a named resource instance, in apiserver message form
    pub fn not_found(kind: &str, name: &str) -> Self {
        ApiError::NotFound(format!("{} \"{}\" not found", kind, name))
    }

    /// HTTP status code for this error
    pub fn code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed(_) | ApiError::NotImplemented(_) => {
                StatusCode::NOT_IMPLEMENTED
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason, mirroring apimachinery's StatusReason values
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::AlreadyExists(_) => "AlreadyExists",
            ApiError::Conflict(_) => "Conflict",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::MethodNotAllowed(_) => "MethodNotAllowed",
            ApiError::NotImplemented(_) => "NotImplemented",
            ApiError::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        if code.is_server_error() {
            tracing::warn!(code = code.as_u16(), reason = self.reason(), "{}", self);
        }

        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "code": code.as_u16(),
        });

        (code, Json(body)).into_response()
    }
}
