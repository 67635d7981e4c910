//! In-memory stores
//!
//! DashMap-backed implementations of [`UserStore`] and [`TokenLedger`], used
//! when no `DATABASE_URL` is configured and throughout the test suite.
//! State is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::core::db::models::{CreateRefreshToken, CreateUser, RefreshTokenRecord, User};
use crate::core::db::repositories::{TokenLedger, TokenLedgerError, UserRepositoryError, UserStore};

/// Users keyed by id, with a unique email index
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: DashMap<Uuid, User>,
    by_email: DashMap<String, Uuid>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let Some(id) = self.by_email.get(email).map(|r| *r.value()) else {
            return Ok(None);
        };
        Ok(self.users.get(&id).map(|r| r.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.get(&id).map(|r| r.value().clone()))
    }

    async fn create(&self, dto: &CreateUser) -> Result<User, UserRepositoryError> {
        // The email entry guard serializes concurrent registrations of one address
        match self.by_email.entry(dto.email.clone()) {
            Entry::Occupied(_) => Err(UserRepositoryError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                let user = User {
                    id: Uuid::new_v4(),
                    email: dto.email.clone(),
                    password_hash: dto.password_hash.clone(),
                    name: dto.name.clone(),
                    created_at: dto.created_at,
                    last_login_at: None,
                };
                self.users.insert(user.id, user.clone());
                slot.insert(user.id);
                Ok(user)
            }
        }
    }

    async fn touch_last_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), UserRepositoryError> {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or(UserRepositoryError::NotFound)?;
        user.last_login_at = Some(at);
        Ok(())
    }
}

/// Refresh token ledger keyed by token hash
#[derive(Debug, Default)]
pub struct InMemoryTokenLedger {
    entries: DashMap<String, RefreshTokenRecord>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, revoked ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of active entries owned by `user_id`
    pub fn active_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> usize {
        self.entries
            .iter()
            .filter(|r| r.user_id == user_id && r.is_active(now))
            .count()
    }
}

#[async_trait]
impl TokenLedger for InMemoryTokenLedger {
    async fn create(
        &self,
        dto: &CreateRefreshToken,
    ) -> Result<RefreshTokenRecord, TokenLedgerError> {
        match self.entries.entry(dto.token_hash.clone()) {
            Entry::Occupied(_) => Err(TokenLedgerError::DuplicateToken),
            Entry::Vacant(slot) => {
                let record = RefreshTokenRecord {
                    id: Uuid::new_v4(),
                    token_hash: dto.token_hash.clone(),
                    user_id: dto.user_id,
                    expires_at: dto.expires_at,
                    revoked_at: None,
                    created_at: dto.created_at,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find_valid(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, TokenLedgerError> {
        Ok(self
            .entries
            .get(token_hash)
            .filter(|r| r.is_active(now))
            .map(|r| r.value().clone()))
    }

    async fn revoke(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, TokenLedgerError> {
        // get_mut holds the shard write lock for the check and the update
        let Some(mut record) = self.entries.get_mut(token_hash) else {
            return Ok(false);
        };
        if !record.is_active(now) {
            return Ok(false);
        }
        record.revoked_at = Some(now);
        Ok(true)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenLedgerError> {
        let mut revoked = 0;
        for mut record in self.entries.iter_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn cleanup_expired(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> Result<u64, TokenLedgerError> {
        let before = self.entries.len();
        self.entries.retain(|_, r| {
            let expired = r.expires_at <= now;
            let stale_revocation = r.revoked_at.is_some_and(|at| at <= revoked_before);
            !(expired || stale_revocation)
        });
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
