//! Database models for the gatekeeping layer
//!
//! Entity structs that map to the `users` and `refresh_tokens` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// User Model
// ============================================================================

/// User entity representing a registered account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    /// Trimmed and lowercased, unique
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// User data for creation (password already hashed)
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User without sensitive data (for API responses)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

// ============================================================================
// Refresh Token Model
// ============================================================================

/// Ledger entry for an issued refresh token
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    /// SHA-256 hex digest of the raw token
    pub token_hash: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Unrevoked and not yet expired at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Refresh token data for creation
#[derive(Debug, Clone)]
pub struct CreateRefreshToken {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            password_hash: "secret_hash".to_string(),
            name: Some("Test".to_string()),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    #[test]
    fn test_user_response_from_user() {
        let user = sample_user();
        let response: UserResponse = user.clone().into();

        assert_eq!(response.id, user.id);
        assert_eq!(response.email, user.email);
        assert_eq!(response.name, user.name);
    }

    #[test]
    fn test_user_serialization_skips_password_hash() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("secret_hash"));
    }

    #[test]
    fn test_user_response_is_camel_case() {
        let response: UserResponse = sample_user().into();
        let json = serde_json::to_value(&response).unwrap();

        assert!(json.get("createdAt").is_some());
        assert!(json.get("lastLoginAt").is_some());
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn test_refresh_token_is_active() {
        let now = Utc::now();
        let mut record = RefreshTokenRecord {
            id: Uuid::new_v4(),
            token_hash: "abc".to_string(),
            user_id: Uuid::new_v4(),
            expires_at: now + Duration::days(7),
            revoked_at: None,
            created_at: now,
        };

        assert!(record.is_active(now));
        assert!(!record.is_active(now + Duration::days(7)));

        record.revoked_at = Some(now);
        assert!(!record.is_active(now));
    }
}
