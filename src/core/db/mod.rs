//! Persistence for users and refresh tokens
//!
//! PostgreSQL via SQLx when a database is configured, DashMap-backed stores
//! otherwise.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;

// Re-export commonly used items
pub use memory::{InMemoryTokenLedger, InMemoryUserStore};
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations};
pub use repositories::{
    RefreshTokenRepository, TokenLedger, TokenLedgerError, UserRepository, UserRepositoryError,
    UserStore, hash_token,
};

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
