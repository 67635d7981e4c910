//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /auth/register - Register a new user
//! - POST /auth/login - Login and get tokens
//! - POST /auth/logout - Logout (revoke refresh tokens)
//! - POST /auth/refresh - Rotate the refresh token
//! - GET /auth/me - Get current user info
//!
//! The router is nested under `/api` by the application.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::core::auth::extractor::CurrentUser;
use crate::core::auth::{
    AuthError, AuthResponse, AuthService, LoginRequest, LogoutRequest, LogoutResponse,
    RefreshRequest, RefreshResponse, RegisterRequest,
};
use crate::core::db::models::UserResponse;
use crate::core::error::{ApiError, ErrorKind};

impl AuthError {
    /// Error category, which fixes the HTTP status
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidEmail
            | AuthError::InvalidName
            | AuthError::PasswordTooShort
            | AuthError::PasswordTooLong
            | AuthError::PasswordTooWeak
            | AuthError::InvalidRequest(_) => ErrorKind::Validation,
            AuthError::EmailAlreadyExists => ErrorKind::Conflict,
            AuthError::InvalidCredentials
            | AuthError::RefreshTokenInvalid
            | AuthError::TokenRequired
            | AuthError::TokenInvalid
            | AuthError::UserNotFound => ErrorKind::Authentication,
            AuthError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidEmail => "INVALID_EMAIL",
            AuthError::InvalidName => "INVALID_NAME",
            AuthError::PasswordTooShort => "PASSWORD_TOO_SHORT",
            AuthError::PasswordTooLong => "PASSWORD_TOO_LONG",
            AuthError::PasswordTooWeak => "PASSWORD_TOO_WEAK",
            AuthError::InvalidRequest(_) => "INVALID_REQUEST",
            AuthError::EmailAlreadyExists => "EMAIL_EXISTS",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::RefreshTokenInvalid => "REFRESH_TOKEN_INVALID",
            AuthError::TokenRequired => "AUTH_TOKEN_REQUIRED",
            AuthError::TokenInvalid => "AUTH_TOKEN_INVALID",
            AuthError::UserNotFound => "AUTH_USER_NOT_FOUND",
            AuthError::InternalError(_) => crate::core::error::INTERNAL_ERROR_CODE,
        }
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let kind = self.kind();

        let body = match &self {
            AuthError::InternalError(detail) => {
                tracing::error!(error = %detail, "Auth request failed");
                ApiError::internal()
            }
            _ => ApiError::new(self.to_string(), self.code()),
        };

        body.into_response_with(kind)
    }
}

/// Unwrap a JSON body, mapping parse failures to `INVALID_REQUEST`
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AuthError::InvalidRequest(rejection.body_text()))
}

/// Create the auth API router
pub fn auth_api_router(auth_service: AuthService) -> Router {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/refresh", post(refresh_handler))
        .route("/auth/me", get(me_handler))
        .with_state(auth_service)
}

/// POST /auth/register
async fn register_handler(
    State(auth_service): State<AuthService>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    let request = json_body(payload)?;

    let response = auth_service.register(request).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login
async fn login_handler(
    State(auth_service): State<AuthService>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AuthError> {
    let request = json_body(payload)?;

    let response = auth_service.login(request).await?;

    Ok(Json(response))
}

/// POST /auth/logout
/// Requires a bearer token; the body may be empty
async fn logout_handler(
    State(auth_service): State<AuthService>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>, AuthError> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => LogoutRequest::default(),
        Err(rejection) => return Err(AuthError::InvalidRequest(rejection.body_text())),
    };

    auth_service.logout(user.id, request).await?;

    Ok(Json(LogoutResponse { logged_out: true }))
}

/// POST /auth/refresh
async fn refresh_handler(
    State(auth_service): State<AuthService>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshResponse>, AuthError> {
    let request = json_body(payload)?;

    let tokens = auth_service.refresh(&request.refresh_token).await?;

    Ok(Json(RefreshResponse { tokens }))
}

/// GET /auth/me
async fn me_handler(
    State(auth_service): State<AuthService>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UserResponse>, AuthError> {
    let user = auth_service.current_user(user.id).await?;

    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_and_code(err: AuthError) -> (StatusCode, &'static str) {
        (err.kind().status(), err.code())
    }

    #[test]
    fn test_validation_errors_are_bad_request() {
        for err in [
            AuthError::InvalidEmail,
            AuthError::InvalidName,
            AuthError::PasswordTooShort,
            AuthError::PasswordTooLong,
            AuthError::PasswordTooWeak,
            AuthError::InvalidRequest("bad".into()),
        ] {
            assert_eq!(err.kind().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            status_and_code(AuthError::EmailAlreadyExists),
            (StatusCode::CONFLICT, "EMAIL_EXISTS")
        );
        assert_eq!(
            status_and_code(AuthError::InvalidCredentials),
            (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS")
        );
        assert_eq!(
            status_and_code(AuthError::RefreshTokenInvalid),
            (StatusCode::UNAUTHORIZED, "REFRESH_TOKEN_INVALID")
        );
        assert_eq!(
            status_and_code(AuthError::TokenRequired),
            (StatusCode::UNAUTHORIZED, "AUTH_TOKEN_REQUIRED")
        );
        assert_eq!(
            status_and_code(AuthError::TokenInvalid),
            (StatusCode::UNAUTHORIZED, "AUTH_TOKEN_INVALID")
        );
        assert_eq!(
            status_and_code(AuthError::UserNotFound),
            (StatusCode::UNAUTHORIZED, "AUTH_USER_NOT_FOUND")
        );
        assert_eq!(
            status_and_code(AuthError::InternalError("db down".into())),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        );
    }

    #[test]
    fn test_internal_error_response_status() {
        let response = AuthError::InternalError("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_auth_error_response_status() {
        let response = AuthError::RefreshTokenInvalid.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
