//! Event service error types with HTTP status code mapping.
//!
//! [`EventServiceError`] is the central error type shared by the registry,
//! the connectors and the client state machine. Each variant maps to a
//! numeric code and an HTTP status so the service layer can render it as a
//! structured JSON body, and the client transport can map it back.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "unknown user: 7f0c...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`EventServiceError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error enum shared by server and client sides.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request             |
/// | 2000–2999 | State           | 410 Gone                    |
/// | 3000–3999 | Server          | 500 Internal Server Error   |
/// | 5000–5999 | Transport       | 502 / 503                   |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventServiceError {
    /// The user id has no registered state (never registered or evicted).
    ///
    /// Never retryable: the client has to start over from an inactive state.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// An event payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Connection-level failure that may succeed when retried.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// Transport failure that must not be retried.
    #[error("fatal transport error: {0}")]
    FatalTransport(String),

    /// Invalid or inconsistent configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventServiceError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Serialization(_) => 1002,
            Self::UnknownUser(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Configuration(_) => 3001,
            Self::TransientTransport(_) => 5001,
            Self::FatalTransport(_) => 5002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::UnknownUser(_) => StatusCode::GONE,
            Self::Internal(_) | Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TransientTransport(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::FatalTransport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Returns `true` if the failed operation may be re-issued immediately.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientTransport(_))
    }

    /// Rebuilds an error from a decoded [`ErrorBody`], as produced by the
    /// [`IntoResponse`] implementation on the other side of the wire.
    #[must_use]
    pub fn from_body(body: ErrorBody) -> Self {
        let message = body.message;
        match body.code {
            1001 => Self::InvalidRequest(message),
            1002 => Self::Serialization(message),
            2001 => Self::UnknownUser(message),
            3001 => Self::Configuration(message),
            5001 => Self::TransientTransport(message),
            5002 => Self::FatalTransport(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<serde_json::Error> for EventServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl IntoResponse for EventServiceError {
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
