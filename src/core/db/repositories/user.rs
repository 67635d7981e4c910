//! User repository for database operations
//!
//! The gatekeeping layer only needs a narrow slice of user persistence:
//! lookup by email or id, creation, and stamping the last login.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::DbError;
use crate::core::db::models::{CreateUser, User};

/// User repository error types
#[derive(Debug, thiserror::Error)]
pub enum UserRepositoryError {
    #[error("User not found")]
    NotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<DbError> for UserRepositoryError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ConnectionError(e) => UserRepositoryError::DatabaseError(e),
            _ => UserRepositoryError::DatabaseError(sqlx::Error::Protocol(err.to_string())),
        }
    }
}

/// Persistence contract for user accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by normalized email
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError>;

    /// Find a user by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError>;

    /// Insert a new user, failing with `EmailAlreadyExists` on a duplicate
    async fn create(&self, dto: &CreateUser) -> Result<User, UserRepositoryError>;

    /// Record a successful login
    async fn touch_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), UserRepositoryError>;
}

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, created_at, last_login_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, created_at, last_login_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, dto: &CreateUser) -> Result<User, UserRepositoryError> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, password_hash, name, created_at, last_login_at
            "#,
        )
        .bind(&dto.email)
        .bind(&dto.password_hash)
        .bind(&dto.name)
        .bind(dto.created_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(e) if is_unique_violation(&e) => Err(UserRepositoryError::EmailAlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), UserRepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserRepositoryError::NotFound);
        }

        Ok(())
    }
}
