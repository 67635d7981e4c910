//! Refresh token ledger
//!
//! Tracks every issued refresh token so that rotation and logout can revoke
//! them. Tokens are stored as SHA-256 hashes; the raw token never touches
//! the database.
//!
//! Revocation is a conditional update: it only succeeds while the entry is
//! unrevoked and unexpired, which makes it the single gate a refresh has to
//! pass. Two concurrent refreshes with the same token race on that update
//! and exactly one wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{CreateRefreshToken, RefreshTokenRecord};

/// Hash a token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Token ledger error types
#[derive(Debug, thiserror::Error)]
pub enum TokenLedgerError {
    #[error("Token already recorded")]
    DuplicateToken,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Persistence contract for refresh tokens
#[async_trait]
pub trait TokenLedger: Send + Sync {
    /// Record a freshly issued token
    async fn create(&self, dto: &CreateRefreshToken)
    -> Result<RefreshTokenRecord, TokenLedgerError>;

    /// Look up an entry that is unrevoked and unexpired at `now`
    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, TokenLedgerError>;

    /// Revoke one entry if it is still active at `now`.
    ///
    /// Returns `true` only for the caller that performed the transition.
    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, TokenLedgerError>;

    /// Revoke every active entry owned by `user_id`
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenLedgerError>;

    /// Delete entries expired at `now` or revoked at or before `revoked_before`
    async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> Result<u64, TokenLedgerError>;
}

/// PostgreSQL-backed refresh token ledger
#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: PgPool,
}

impl RefreshTokenRepository {
    /// Create a new refresh token repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenLedger for RefreshTokenRepository {
    async fn create(
        &self,
        dto: &CreateRefreshToken,
    ) -> Result<RefreshTokenRecord, TokenLedgerError> {
        let result = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, token_hash, user_id, expires_at, revoked_at, created_at
            "#,
        )
        .bind(dto.user_id)
        .bind(&dto.token_hash)
        .bind(dto.expires_at)
        .bind(dto.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(TokenLedgerError::DuplicateToken)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, TokenLedgerError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT id, token_hash, user_id, expires_at, revoked_at, created_at
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, TokenLedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE token_hash = $1 AND revoked_at IS NULL AND expires_at > $2
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenLedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $2
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> Result<u64, TokenLedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at <= $1
               OR (revoked_at IS NOT NULL AND revoked_at <= $2)
            "#,
        )
        .bind(now)
        .bind(revoked_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
