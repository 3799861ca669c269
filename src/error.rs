//! Change-log error types with HTTP status code mapping.
//!
//! [`ChangeLogError`] is the central error type of the crate. Store and pool
//! failures are wrapped with the operation and target they belong to before
//! they reach a caller, and each variant maps to a numeric code and HTTP
//! status for the REST surface.

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
///     "message": "invalid request: category must not be empty",
///     "details": null
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
    /// Numeric error code (see [`ChangeLogError`] code ranges).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error enum shared by the pool, store, cache and service layers.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                       |
/// |-----------|-----------------|-----------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request                   |
/// | 3000–3999 | Server / Store  | 500 Internal / 503 Unavailable    |
#[derive(Debug, thiserror::Error)]
pub enum ChangeLogError {
    /// No pooled connection became available within the acquire timeout.
    #[error("connection pool exhausted after waiting {waited_ms} ms")]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },

    /// A write to the change record store failed.
    #[error("{operation} failed for {target}: {reason}")]
    WriteFailure {
        /// Store operation that failed (e.g. `"append"`).
        operation: &'static str,
        /// What the write was about (e.g. `"subject steve"`).
        target: String,
        /// `true` when the cause was connectivity rather than a constraint.
        transient: bool,
        /// Backend error message.
        reason: String,
    },

    /// A read from the change record store failed.
    #[error("{operation} failed for {target}: {reason}")]
    ReadFailure {
        /// Store operation that failed (e.g. `"query"`).
        operation: &'static str,
        /// What the read was about.
        target: String,
        /// `true` when retrying may succeed.
        transient: bool,
        /// Backend error message.
        reason: String,
    },

    /// Configuration is missing or inconsistent. Fatal at startup.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Caller supplied invalid input.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The change log was shut down and its pool closed.
    #[error("change log has been shut down")]
    ShutDown,

    /// The backing store could not be reached or prepared during startup.
    #[error("startup failed: {0}")]
    StartupFailure(String),
}

impl ChangeLogError {
    /// Returns `true` if retrying the same call after a backoff may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } => true,
            Self::WriteFailure { transient, .. } | Self::ReadFailure { transient, .. } => {
                *transient
            }
            Self::ConfigurationError(_)
            | Self::InvalidRequest(_)
            | Self::ShutDown
            | Self::StartupFailure(_) => false,
        }
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::PoolExhausted { .. } => 3002,
            Self::WriteFailure { .. } => 3003,
            Self::ReadFailure { .. } => 3004,
            Self::ShutDown => 3005,
            Self::ConfigurationError(_) => 3006,
            Self::StartupFailure(_) => 3007,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PoolExhausted { .. } | Self::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::WriteFailure { transient, .. } | Self::ReadFailure { transient, .. } => {
                if *transient {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
            Self::ConfigurationError(_) | Self::StartupFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ChangeLogError {
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
