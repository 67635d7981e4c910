//! JWT utilities for token generation and validation
//!
//! Provides JWT token creation and validation using HS256 algorithm.
//! Access tokens are short-lived (15 minutes), refresh tokens are long-lived (7 days).
//! Expiry is checked against the injected [`Clock`], not the system time.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::{ConfigError, MAX_LIFETIME_SECS, parse_in_range};

/// Default access token lifetime (15 minutes)
const ACCESS_TOKEN_TTL_SECS: i64 = 900;

/// Default refresh token lifetime (7 days)
const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

const DEFAULT_ISSUER: &str = "todo-gatekeeper";

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for signing tokens
    pub secret: String,
    /// Access token lifetime in seconds
    pub access_ttl_secs: i64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: i64,
    /// Token issuer
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("access_ttl_secs", &self.access_ttl_secs)
            .field("refresh_ttl_secs", &self.refresh_ttl_secs)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl_secs: ACCESS_TOKEN_TTL_SECS,
            refresh_ttl_secs: REFRESH_TOKEN_TTL_SECS,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Read `JWT_SECRET` and the optional settings from a variable source
    pub fn from_vars(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = var("JWT_SECRET")
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("JWT_SECRET".to_string()))?;

        Self::new(secret).with_vars(var)
    }

    /// Apply `JWT_ACCESS_TTL_SECS`, `JWT_REFRESH_TTL_SECS` and `JWT_ISSUER`
    pub fn with_vars(mut self, var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        self.access_ttl_secs = parse_in_range(
            var,
            "JWT_ACCESS_TTL_SECS",
            self.access_ttl_secs,
            1..=MAX_LIFETIME_SECS,
        )?;
        self.refresh_ttl_secs = parse_in_range(
            var,
            "JWT_REFRESH_TTL_SECS",
            self.refresh_ttl_secs,
            1..=MAX_LIFETIME_SECS,
        )?;
        if let Some(issuer) = var("JWT_ISSUER").filter(|issuer| !issuer.trim().is_empty()) {
            self.issuer = issuer;
        }
        Ok(self)
    }

    /// Set access token lifetime
    pub fn access_ttl(mut self, secs: i64) -> Self {
        self.access_ttl_secs = secs;
        self
    }

    /// Set refresh token lifetime
    pub fn refresh_ttl(mut self, secs: i64) -> Self {
        self.refresh_ttl_secs = secs;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Token decoding failed: {0}")]
    DecodingError(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token type")]
    InvalidTokenType,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_)
            | ErrorKind::MissingRequiredClaim(_) => JwtError::InvalidToken,
            _ => JwtError::DecodingError(err.to_string()),
        }
    }
}

/// Token type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User ID, duplicated from `sub` for clients that read it directly
    #[serde(rename = "userId")]
    pub user_id: String,
    /// User email
    pub email: String,
    /// Token type (access or refresh)
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Unique token id, keeps two tokens minted in the same second distinct
    pub jti: String,
}

impl Claims {
    /// Check if this is an access token
    pub fn is_access_token(&self) -> bool {
        self.token_type == TokenType::Access
    }

    /// Check if this is a refresh token
    pub fn is_refresh_token(&self) -> bool {
        self.token_type == TokenType::Refresh
    }

    /// Get user ID as UUID
    pub fn subject_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }
}

/// Token pair (access + refresh)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    /// Access token (short-lived)
    pub access_token: String,
    /// Refresh token (long-lived)
    pub refresh_token: String,
    /// Access token expiration (Unix timestamp)
    pub access_expires_at: i64,
    /// Refresh token expiration (Unix timestamp)
    pub refresh_expires_at: i64,
    /// Token type (always "Bearer")
    pub token_type: String,
}

impl TokenPair {
    pub fn refresh_expires_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.refresh_expires_at, 0).unwrap_or_else(Utc::now)
    }
}

/// JWT service for token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl JwtService {
    /// Create a new JWT service on the system clock
    pub fn new(config: JwtConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a JWT service reading time from `clock`
    pub fn with_clock(config: JwtConfig, clock: Arc<dyn Clock>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
            clock,
        }
    }

    fn generate_token(
        &self,
        user_id: Uuid,
        email: &str,
        token_type: TokenType,
    ) -> Result<(String, i64), JwtError> {
        let now = self.clock.now();
        let ttl = match token_type {
            TokenType::Access => self.config.access_ttl_secs,
            TokenType::Refresh => self.config.refresh_ttl_secs,
        };
        let exp = Duration::try_seconds(ttl)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                JwtError::EncodingError(format!("token lifetime {}s out of range", ttl))
            })?;

        let claims = Claims {
            sub: user_id.to_string(),
            user_id: user_id.to_string(),
            email: email.to_string(),
            token_type,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?;

        Ok((token, exp.timestamp()))
    }

    /// Generate an access token
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<(String, i64), JwtError> {
        self.generate_token(user_id, email, TokenType::Access)
    }

    /// Generate a refresh token
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<(String, i64), JwtError> {
        self.generate_token(user_id, email, TokenType::Refresh)
    }

    /// Generate both access and refresh tokens
    pub fn generate_token_pair(&self, user_id: Uuid, email: &str) -> Result<TokenPair, JwtError> {
        let (access_token, access_expires_at) = self.generate_access_token(user_id, email)?;
        let (refresh_token, refresh_expires_at) = self.generate_refresh_token(user_id, email)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Validate and decode a token
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        // Expiry is enforced below against the injected clock
        validation.validate_exp = false;
        validation.leeway = 0;

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        let claims = token_data.claims;

        if claims.exp <= self.clock.now().timestamp() {
            return Err(JwtError::Expired);
        }

        Ok(claims)
    }

    /// Validate an access token specifically
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;

        if !claims.is_access_token() {
            return Err(JwtError::InvalidTokenType);
        }

        Ok(claims)
    }

    /// Validate a refresh token specifically
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = self.validate_token(token)?;

        if !claims.is_refresh_token() {
            return Err(JwtError::InvalidTokenType);
        }

        Ok(claims)
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.config.access_ttl_secs
    }
}
