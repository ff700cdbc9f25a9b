//! Error types.
//!
//! [`GatewayError`] is the HTTP-facing error of the broadcaster server and
//! maps each variant to a status code and structured JSON body.
//! [`ClientError`] covers the few client operations that can fail fast;
//! transport failures are recovered by the reconnect policy instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: event type must not be empty"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status     |
/// |-----------|------------|-----------------|
/// | 1000–1999 | Validation | 400 Bad Request |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Errors returned by the client connection manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No endpoint is registered under the given name.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),
}

/// Errors raised while starting or running the synthetic event generator.
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// Binding or serving the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded as an envelope.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
