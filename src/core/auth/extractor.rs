//! Request authentication
//!
//! Two equivalent entry points for protected routes:
//!
//! - [`CurrentUser`] as a handler argument
//! - [`require_authentication`] as a route layer, which stores the
//!   [`CurrentUser`] in request extensions for downstream handlers
//!
//! Both verify the bearer access token and re-load the user, so a token that
//! outlives its account is rejected.

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::core::auth::{AuthError, AuthService};
use crate::core::db::models::User;

/// Authenticated user resolved from the bearer token
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
    pub fn user(&self) -> &User {
        &self.0
    }
}

/// Extract the bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::TokenRequired)?;

    let (scheme, token) = auth_header
        .split_once(' ')
        .ok_or(AuthError::TokenRequired)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(AuthError::TokenRequired);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::TokenRequired);
    }

    Ok(token)
}

async fn authenticate_headers(
    auth_service: &AuthService,
    headers: &HeaderMap,
) -> Result<CurrentUser, AuthError> {
    let token = extract_bearer_token(headers)?;
    let user = auth_service.authenticate(token).await?;
    Ok(CurrentUser(user))
}

impl<S> FromRequestParts<S> for CurrentUser
where
    AuthService: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Already resolved by require_authentication
        if let Some(current) = parts.extensions.get::<CurrentUser>() {
            return Ok(current.clone());
        }

        let auth_service = AuthService::from_ref(state);
        authenticate_headers(&auth_service, &parts.headers).await
    }
}

/// Middleware rejecting requests without a valid access token
pub async fn require_authentication(
    State(auth_service): State<AuthService>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let current = authenticate_headers(&auth_service, request.headers()).await?;
    request.extensions_mut().insert(current);
    Ok(next.run(request).await)
}
