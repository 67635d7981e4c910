//! Authentication service
//!
//! Provides business logic for user registration, login, logout, and token refresh.
//! Coordinates between the user store, the refresh token ledger, the password
//! hasher and the JWT service.
//!
//! Refresh tokens rotate: every successful refresh revokes the presented token
//! before a new pair is issued, so each refresh token redeems at most once.

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::auth::jwt::{JwtError, JwtService, TokenPair};
use crate::core::auth::password::{PasswordError, PasswordHasher};
use crate::core::clock::Clock;
use crate::core::db::models::{CreateRefreshToken, CreateUser, User, UserResponse};
use crate::core::db::repositories::{
    TokenLedger, TokenLedgerError, UserRepositoryError, UserStore, hash_token,
};

const MIN_PASSWORD_CHARS: usize = 8;
const MAX_PASSWORD_CHARS: usize = 100;
const MAX_NAME_CHARS: usize = 100;
const MAX_EMAIL_LEN: usize = 254;

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Invalid name")]
    InvalidName,

    #[error("Password too short (minimum 8 characters)")]
    PasswordTooShort,

    #[error("Password too long (maximum 100 characters)")]
    PasswordTooLong,

    #[error("Password must contain uppercase, lowercase and a digit")]
    PasswordTooWeak,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid refresh token")]
    RefreshTokenInvalid,

    #[error("Authentication token required")]
    TokenRequired,

    #[error("Invalid authentication token")]
    TokenInvalid,

    #[error("User not found")]
    UserNotFound,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<UserRepositoryError> for AuthError {
    fn from(err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::EmailAlreadyExists => AuthError::EmailAlreadyExists,
            _ => AuthError::InternalError(err.to_string()),
        }
    }
}

impl From<TokenLedgerError> for AuthError {
    fn from(err: TokenLedgerError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::InternalError(err.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired
            | JwtError::InvalidToken
            | JwtError::InvalidTokenType
            | JwtError::DecodingError(_) => AuthError::TokenInvalid,
            _ => AuthError::InternalError(err.to_string()),
        }
    }
}

/// Registration request data
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Login request data
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub all_devices: bool,
}

/// Authentication response with user data and tokens
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub tokens: TokenPair,
}

/// Refresh response
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshResponse {
    pub tokens: TokenPair,
}

/// Logout response
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn TokenLedger>,
    jwt_service: JwtService,
    passwords: PasswordHasher,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// Create a new authentication service
    pub fn new(
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn TokenLedger>,
        jwt_service: JwtService,
        passwords: PasswordHasher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            ledger,
            jwt_service,
            passwords,
            clock,
        }
    }

    /// Trim and lowercase an email address
    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Validate email format
    fn validate_email(email: &str) -> Result<(), AuthError> {
        if email.is_empty() || email.len() > MAX_EMAIL_LEN {
            return Err(AuthError::InvalidEmail);
        }

        if email.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(AuthError::InvalidEmail);
        }

        // something@something.something
        let Some((local, domain)) = email.split_once('@') else {
            return Err(AuthError::InvalidEmail);
        };

        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(AuthError::InvalidEmail);
        }

        if !domain.contains('.') || domain.split('.').any(|p| p.is_empty()) {
            return Err(AuthError::InvalidEmail);
        }

        Ok(())
    }

    /// Validate and trim an optional display name
    fn validate_name(name: Option<&str>) -> Result<Option<String>, AuthError> {
        let Some(name) = name else {
            return Ok(None);
        };

        let trimmed = name.trim();
        if trimmed.is_empty()
            || trimmed.chars().count() > MAX_NAME_CHARS
            || trimmed.chars().any(|c| c.is_control())
        {
            return Err(AuthError::InvalidName);
        }

        Ok(Some(trimmed.to_string()))
    }

    /// Validate password strength
    fn validate_password(password: &str) -> Result<(), AuthError> {
        let length = password.chars().count();
        if length < MIN_PASSWORD_CHARS {
            return Err(AuthError::PasswordTooShort);
        }
        if length > MAX_PASSWORD_CHARS {
            return Err(AuthError::PasswordTooLong);
        }

        // At least one of each: uppercase, lowercase, digit
        let has_uppercase = password.chars().any(|c| c.is_uppercase());
        let has_lowercase = password.chars().any(|c| c.is_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());

        if !has_uppercase || !has_lowercase || !has_digit {
            return Err(AuthError::PasswordTooWeak);
        }

        Ok(())
    }

    /// Generate a token pair and record its refresh token in the ledger
    async fn issue_session(&self, user: &User) -> Result<TokenPair, AuthError> {
        let tokens = self.jwt_service.generate_token_pair(user.id, &user.email)?;

        self.ledger
            .create(&CreateRefreshToken {
                user_id: user.id,
                token_hash: hash_token(&tokens.refresh_token),
                expires_at: tokens.refresh_expires_at_utc(),
                created_at: self.clock.now(),
            })
            .await?;

        Ok(tokens)
    }

    /// Register a new user
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AuthError> {
        let email = Self::normalize_email(&request.email);
        Self::validate_email(&email)?;
        let name = Self::validate_name(request.name.as_deref())?;
        Self::validate_password(&request.password)?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let password_hash = self.passwords.hash(&request.password).await?;

        let mut user = self
            .users
            .create(&CreateUser {
                email,
                password_hash,
                name,
                created_at: self.clock.now(),
            })
            .await?;

        let tokens = self.issue_session(&user).await?;

        let now = self.clock.now();
        self.users.touch_last_login(user.id, now).await?;
        user.last_login_at = Some(now);

        tracing::info!(user_id = %user.id, "User registered");

        Ok(AuthResponse {
            user: user.into(),
            tokens,
        })
    }

    /// Login an existing user
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, AuthError> {
        let email = Self::normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::InvalidRequest(
                "Email and password are required".to_string(),
            ));
        }

        let Some(mut user) = self.users.find_by_email(&email).await? else {
            // Keep response timing independent of whether the account exists
            self.passwords.verify_dummy(&request.password).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .passwords
            .verify(&request.password, &user.password_hash)
            .await?
        {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.issue_session(&user).await?;

        let now = self.clock.now();
        self.users.touch_last_login(user.id, now).await?;
        user.last_login_at = Some(now);

        tracing::info!(user_id = %user.id, "User logged in");

        Ok(AuthResponse {
            user: user.into(),
            tokens,
        })
    }

    /// Exchange a refresh token for a new token pair, revoking the old one
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self
            .jwt_service
            .validate_refresh_token(refresh_token)
            .map_err(|e| {
                tracing::debug!(error = %e, "Refresh token rejected");
                AuthError::RefreshTokenInvalid
            })?;
        let user_id = claims
            .subject_id()
            .map_err(|_| AuthError::RefreshTokenInvalid)?;

        let token_hash = hash_token(refresh_token);
        let now = self.clock.now();

        let Some(record) = self.ledger.find_valid(&token_hash, now).await? else {
            tracing::warn!(user_id = %user_id, "Refresh token not active in ledger");
            return Err(AuthError::RefreshTokenInvalid);
        };
        if record.user_id != user_id {
            tracing::warn!(user_id = %user_id, "Refresh token owner mismatch");
            return Err(AuthError::RefreshTokenInvalid);
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::RefreshTokenInvalid)?;

        // The conditional revoke is the only gate; a concurrent caller with the
        // same token loses here
        if !self.ledger.revoke(&token_hash, now).await? {
            tracing::warn!(user_id = %user.id, "Refresh token reuse detected");
            return Err(AuthError::RefreshTokenInvalid);
        }

        let tokens = self.issue_session(&user).await?;

        tracing::info!(user_id = %user.id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Revoke the caller's refresh token, or all of them
    pub async fn logout(&self, user_id: Uuid, request: LogoutRequest) -> Result<(), AuthError> {
        let now = self.clock.now();

        if request.all_devices {
            let revoked = self.ledger.revoke_all_for_user(user_id, now).await?;
            tracing::info!(user_id = %user_id, revoked, "User logged out from all devices");
            return Ok(());
        }

        if let Some(refresh_token) = request.refresh_token.as_deref() {
            let token_hash = hash_token(refresh_token);
            match self.ledger.find_valid(&token_hash, now).await? {
                Some(record) if record.user_id == user_id => {
                    self.ledger.revoke(&token_hash, now).await?;
                }
                Some(_) => {
                    tracing::warn!(user_id = %user_id, "Logout with another user's refresh token");
                }
                None => {}
            }
        }

        tracing::info!(user_id = %user_id, "User logged out");
        Ok(())
    }

    /// Resolve an access token to a live user
    pub async fn authenticate(&self, access_token: &str) -> Result<User, AuthError> {
        let claims = self
            .jwt_service
            .validate_access_token(access_token)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AuthError::from(e)
            })?;
        let user_id = claims.subject_id().map_err(|_| AuthError::TokenInvalid)?;

        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Get the public projection of a user
    pub async fn current_user(&self, user_id: Uuid) -> Result<UserResponse, AuthError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        Ok(user.into())
    }

    /// Delete expired ledger entries and revocations older than `retention`
    pub async fn cleanup_expired_tokens(&self, retention: Duration) -> Result<u64, AuthError> {
        let now = self.clock.now();
        let removed = self.ledger.cleanup_expired(now, now - retention).await?;
        Ok(removed)
    }
}
