//! Database repositories
//!
//! Each repository pairs a persistence trait with its PostgreSQL
//! implementation. In-memory implementations live in [`crate::core::db::memory`].

pub mod refresh_token;
pub mod user;

pub use refresh_token::{RefreshTokenRepository, TokenLedger, TokenLedgerError, hash_token};
pub use user::{UserRepository, UserRepositoryError, UserStore};
