//! Rate limit state stores
//!
//! Counters and blacklist entries live behind small traits so the limiter can
//! run against deterministic fakes. The in-memory implementations use
//! DashMap; a counter update holds the entry's shard lock for the whole
//! read-modify-write.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::net::IpAddr;

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Rate limit time out of range: {0}")]
    OutOfRange(String),
}

/// Seconds as a `Duration`, `None` when out of chrono's range
pub fn duration_from_secs(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

/// Counter identity: one client in one scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub client_ip: IpAddr,
    /// Operation class name or endpoint override key
    pub scope: String,
}

impl CounterKey {
    pub fn new(client_ip: IpAddr, scope: impl Into<String>) -> Self {
        Self {
            client_ip,
            scope: scope.into(),
        }
    }
}

/// Per-key fixed-window counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitCounter {
    pub window_start: DateTime<Utc>,
    pub window_secs: u64,
    pub count: u32,
    pub violation_count: u32,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub last_decay_at: Option<DateTime<Utc>>,
}

impl RateLimitCounter {
    pub fn new(now: DateTime<Utc>, window_secs: u64) -> Self {
        Self {
            window_start: now,
            window_secs,
            count: 0,
            violation_count: 0,
            last_violation_at: None,
            last_decay_at: None,
        }
    }

    pub fn window(&self) -> Option<Duration> {
        duration_from_secs(self.window_secs)
    }

    pub fn window_end(&self) -> Option<DateTime<Utc>> {
        self.window_start.checked_add_signed(self.window()?)
    }

    /// Last moment the violation count changed, or the window start
    pub fn quiet_since(&self) -> DateTime<Utc> {
        [self.last_violation_at, self.last_decay_at]
            .into_iter()
            .flatten()
            .max()
            .unwrap_or(self.window_start)
    }

    /// Idle for `stale_windows` windows past its end, with violations long decayed
    /// Counters whose windows do not fit in chrono's range are never stale
    pub fn is_stale(&self, now: DateTime<Utc>, stale_windows: u32) -> bool {
        let stale = || -> Option<bool> {
            let window = self.window()?;
            let idle_for = window.checked_mul(i32::try_from(stale_windows).ok()?)?;
            let decays = i32::try_from(self.violation_count.min(100_000)).ok()?;
            let full_decay = window.checked_mul(2)?.checked_mul(decays)?;
            Some(now - self.window_end()? >= idle_for && now - self.quiet_since() >= full_decay)
        };
        stale().unwrap_or(false)
    }
}

/// Temporary block on a client address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub client_ip: IpAddr,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
    /// Violation count that triggered the block
    pub violations: u32,
}

/// Storage for rate limit counters
pub trait CounterStore: Send + Sync {
    /// Run `apply` on the counter for `key` under an exclusive per-key lock,
    /// inserting `init` first when the key is absent
    fn update(
        &self,
        key: &CounterKey,
        init: RateLimitCounter,
        apply: &mut dyn FnMut(&mut RateLimitCounter),
    ) -> Result<(), RateLimitError>;

    fn get(&self, key: &CounterKey) -> Result<Option<RateLimitCounter>, RateLimitError>;

    fn len(&self) -> Result<usize, RateLimitError>;

    /// Drop counters for which `remove` returns true, returning how many went
    fn prune(
        &self,
        remove: &dyn Fn(&RateLimitCounter) -> bool,
    ) -> Result<usize, RateLimitError>;
}

/// Storage for blacklist entries
pub trait BlacklistStore: Send + Sync {
    fn get(&self, client_ip: IpAddr) -> Result<Option<BlacklistEntry>, RateLimitError>;

    /// Create an entry, or push an existing one's expiry out to `entry.blocked_until`
    fn block(&self, entry: BlacklistEntry) -> Result<BlacklistEntry, RateLimitError>;

    /// Remove entries whose block ended at or before `now`
    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, RateLimitError>;

    fn len(&self) -> Result<usize, RateLimitError>;
}

/// DashMap-backed counter store
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<CounterKey, RateLimitCounter>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn update(
        &self,
        key: &CounterKey,
        init: RateLimitCounter,
        apply: &mut dyn FnMut(&mut RateLimitCounter),
    ) -> Result<(), RateLimitError> {
        let mut counter = self.counters.entry(key.clone()).or_insert(init);
        apply(counter.value_mut());
        Ok(())
    }

    fn get(&self, key: &CounterKey) -> Result<Option<RateLimitCounter>, RateLimitError> {
        Ok(self.counters.get(key).map(|c| c.value().clone()))
    }

    fn len(&self) -> Result<usize, RateLimitError> {
        Ok(self.counters.len())
    }

    fn prune(
        &self,
        remove: &dyn Fn(&RateLimitCounter) -> bool,
    ) -> Result<usize, RateLimitError> {
        let before = self.counters.len();
        self.counters.retain(|_, counter| !remove(counter));
        Ok(before.saturating_sub(self.counters.len()))
    }
}

/// DashMap-backed blacklist
#[derive(Debug, Default)]
pub struct InMemoryBlacklistStore {
    entries: DashMap<IpAddr, BlacklistEntry>,
}

impl InMemoryBlacklistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlacklistStore for InMemoryBlacklistStore {
    fn get(&self, client_ip: IpAddr) -> Result<Option<BlacklistEntry>, RateLimitError> {
        Ok(self.entries.get(&client_ip).map(|e| e.value().clone()))
    }

    fn block(&self, entry: BlacklistEntry) -> Result<BlacklistEntry, RateLimitError> {
        let mut stored = self
            .entries
            .entry(entry.client_ip)
            .or_insert_with(|| entry.clone());
        if entry.blocked_until > stored.blocked_until {
            stored.blocked_until = entry.blocked_until;
        }
        stored.reason = entry.reason;
        stored.violations = entry.violations;
        Ok(stored.value().clone())
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, RateLimitError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.blocked_until > now);
        Ok(before.saturating_sub(self.entries.len()))
    }

    fn len(&self) -> Result<usize, RateLimitError> {
        Ok(self.entries.len())
    }
}
