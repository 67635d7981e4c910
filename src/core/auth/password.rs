//! Password hashing with bcrypt
//!
//! bcrypt only reads the first 72 bytes of its input, so passwords are first
//! reduced to a SHA-256 hex digest (64 bytes). Every byte of the password
//! then contributes to the stored hash.
//!
//! bcrypt is CPU-bound; all work runs on the blocking thread pool.

use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

use crate::core::config::{ConfigError, parse_or_default};

/// Cost factor for bcrypt hashing (12 is recommended for production)
pub const DEFAULT_BCRYPT_COST: u32 = 12;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// Password errors
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Invalid bcrypt cost {0}, expected 4..=31")]
    InvalidCost(u32),

    #[error("Password hashing failed: {0}")]
    HashingError(String),

    #[error("Hashing task failed: {0}")]
    TaskFailed(String),
}

/// Password hashing configuration
#[derive(Debug, Clone, Copy)]
pub struct PasswordConfig {
    pub cost: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl PasswordConfig {
    pub fn new(cost: u32) -> Result<Self, PasswordError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(PasswordError::InvalidCost(cost));
        }
        Ok(Self { cost })
    }

    /// Read `BCRYPT_COST`, falling back to the default when unset
    pub fn from_vars(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let cost = parse_or_default(var, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        Self::new(cost)
            .map_err(|e| ConfigError::InvalidValue("BCRYPT_COST".to_string(), e.to_string()))
    }
}

const DUMMY_PASSWORD: &str = "dummy-password-for-timing";

fn prehash(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Hashes and verifies passwords
#[derive(Clone)]
pub struct PasswordHasher {
    cost: u32,
    /// Hash checked against when the account does not exist
    dummy_hash: Arc<OnceLock<String>>,
}

impl PasswordHasher {
    /// Create a hasher, computing the dummy hash up front
    ///
    /// This runs one bcrypt hash on the calling thread.
    pub fn new(config: PasswordConfig) -> Self {
        let dummy_hash = OnceLock::new();
        match bcrypt::hash(DUMMY_PASSWORD, config.cost) {
            Ok(hash) => {
                let _ = dummy_hash.set(hash);
            }
            Err(e) => tracing::warn!(error = %e, "Failed to precompute dummy password hash"),
        }

        Self {
            cost: config.cost,
            dummy_hash: Arc::new(dummy_hash),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password using bcrypt with automatic salt generation
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let input = prehash(password);
        let cost = self.cost;

        tokio::task::spawn_blocking(move || bcrypt::hash(input, cost))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
            .map_err(|e| PasswordError::HashingError(e.to_string()))
    }

    /// Verify a password against a bcrypt hash
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let input = prehash(password);
        let hash = hash.to_string();

        tokio::task::spawn_blocking(move || bcrypt::verify(input, &hash))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
            .map_err(|e| PasswordError::HashingError(e.to_string()))
    }

    /// Burn the same bcrypt work as a real verification and discard the result
    pub async fn verify_dummy(&self, password: &str) {
        let input = prehash(password);
        let cost = self.cost;
        let dummy = self.dummy_hash.clone();

        let result = tokio::task::spawn_blocking(move || {
            let hash = match dummy.get() {
                Some(hash) => hash.clone(),
                None => {
                    let hash = bcrypt::hash(DUMMY_PASSWORD, cost)?;
                    let _ = dummy.set(hash.clone());
                    hash
                }
            };
            bcrypt::verify(input, &hash)
        })
        .await;

        if let Ok(Err(e)) = result {
            tracing::debug!(error = %e, "Dummy password verification failed");
        }
    }
}
