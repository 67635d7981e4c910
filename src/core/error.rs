//! Shared error plumbing for HTTP responses
//!
//! Every component error maps onto one [`ErrorKind`], which fixes the HTTP
//! status. The body is always an [`ApiError`] carrying a stable machine code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Stable code used for every internal failure
pub const INTERNAL_ERROR_CODE: &str = "INTERNAL_ERROR";

/// Error categories exposed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input
    Validation,
    /// Missing, invalid or expired credential
    Authentication,
    /// Duplicate resource
    Conflict,
    /// Rate limit or blacklist breach
    Throttled,
    /// Unexpected failure, details stay server-side
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }

    /// Generic body for internal failures
    pub fn internal() -> Self {
        Self::new("Internal server error", INTERNAL_ERROR_CODE)
    }

    /// Render with the status of `kind`
    pub fn into_response_with(self, kind: ErrorKind) -> Response {
        (kind.status(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_status() {
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Authentication.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorKind::Throttled.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorKind::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_api_error_serialization() {
        let error = ApiError::new("Something went wrong", "ERROR_CODE");
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("Something went wrong"));
        assert!(json.contains("ERROR_CODE"));
    }

    #[test]
    fn test_internal_error_hides_details() {
        let error = ApiError::internal();
        assert_eq!(error.code, INTERNAL_ERROR_CODE);
        assert_eq!(error.error, "Internal server error");
    }
}
