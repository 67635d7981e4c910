//! Authentication
//!
//! This module provides:
//! - JWT access/refresh token issuance and validation
//! - Password hashing with bcrypt
//! - Registration, login and rotating refresh tokens
//! - Request authentication for protected routes
//! - REST API endpoints for auth operations

pub mod api;
pub mod extractor;
pub mod jwt;
pub mod password;
pub mod service;

pub use api::auth_api_router;
pub use extractor::{CurrentUser, extract_bearer_token, require_authentication};
pub use jwt::{Claims, JwtConfig, JwtError, JwtService, TokenPair, TokenType};
pub use password::{PasswordConfig, PasswordError, PasswordHasher};
pub use service::{
    AuthError, AuthResponse, AuthService, LoginRequest, LogoutRequest, LogoutResponse,
    RefreshRequest, RefreshResponse, RegisterRequest,
};
