//! Adaptive rate limiter
//!
//! Two tiers per client address:
//!
//! - fixed-window counters per `(ip, scope)`, where scope is the operation
//!   class of the request or a matching endpoint override
//! - a blacklist that rejects a client outright until its block expires
//!
//! Breaching a window records a violation. Violations survive window
//! rollover and decay by one for every two quiet windows; reaching the
//! blacklist threshold blocks the client. Clients with recent violations
//! get a small delay once they pass 80% of their budget.
//!
//! Store failures never reject a request.
//!
//! # Example
//!
//! ```
//! use axum::http::Method;
//! use std::net::IpAddr;
//! use std::sync::Arc;
//! use todo_gatekeeper::core::clock::SystemClock;
//! use todo_gatekeeper::core::rate_limit::{
//!     AdaptiveRateLimiter, RateLimitConfig, RateLimitDecision,
//! };
//!
//! let limiter = AdaptiveRateLimiter::new(RateLimitConfig::default(), Arc::new(SystemClock));
//! let ip: IpAddr = "192.0.2.1".parse().unwrap();
//!
//! match limiter.check(ip, &Method::GET, "/api/health") {
//!     RateLimitDecision::Allowed { headers, .. } => {
//!         assert_eq!(headers.unwrap().remaining, 99);
//!     }
//!     RateLimitDecision::Limited { .. } => unreachable!(),
//! }
//! ```

use axum::http::Method;
use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::core::clock::Clock;
use crate::core::rate_limit::config::RateLimitConfig;
use crate::core::rate_limit::store::{
    BlacklistEntry, BlacklistStore, CounterKey, CounterStore, InMemoryBlacklistStore,
    InMemoryCounterStore, RateLimitCounter, RateLimitError, duration_from_secs,
};

/// Share of the limit after which clients with violations are slowed down
const SOFT_FRICTION_RATIO: f64 = 0.8;

/// Minimum spacing of forced sweeps while the counter store is oversized
const OVERSIZED_SWEEP_SPACING_SECS: i64 = 1;

/// Values for the `X-RateLimit-*` headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds at which the budget resets
    pub reset: i64,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        /// `None` when the check failed open
        headers: Option<RateLimitHeaders>,
        /// Soft-friction delay to apply before handling the request
        delay: Option<std::time::Duration>,
    },
    Limited {
        headers: RateLimitHeaders,
        retry_after_secs: u64,
        violations: u32,
        /// Rejected by the blacklist rather than a counter
        blacklisted: bool,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Result of a maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub counters_removed: usize,
    pub blacklist_removed: usize,
}

/// Whole seconds, rounded up, at least 1
fn ceil_secs(remaining: Duration) -> u64 {
    let millis = remaining.num_milliseconds();
    if millis <= 0 {
        return 1;
    }
    (millis as u64).div_ceil(1000).max(1)
}

pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    counters: Arc<dyn CounterStore>,
    blacklist: Arc<dyn BlacklistStore>,
    clock: Arc<dyn Clock>,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl AdaptiveRateLimiter {
    /// Create a limiter backed by in-memory stores
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(InMemoryBlacklistStore::new()),
            clock,
        )
    }

    pub fn with_stores(
        config: RateLimitConfig,
        counters: Arc<dyn CounterStore>,
        blacklist: Arc<dyn BlacklistStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_sweep = Mutex::new(clock.now());
        Self {
            config,
            counters,
            blacklist,
            clock,
            last_sweep,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decide whether a request may proceed, failing open on store errors
    pub fn check(&self, client_ip: IpAddr, method: &Method, path: &str) -> RateLimitDecision {
        match self.try_check(client_ip, method, path) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(
                    client_ip = %client_ip,
                    error = %e,
                    "Rate limiter failed, allowing request"
                );
                RateLimitDecision::Allowed {
                    headers: None,
                    delay: None,
                }
            }
        }
    }

    fn try_check(
        &self,
        client_ip: IpAddr,
        method: &Method,
        path: &str,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let (scope, rule) = self.config.resolve(method, path);

        // Blacklist takes priority and leaves counters untouched
        if let Some(entry) = self.blacklist.get(client_ip)?
            && now < entry.blocked_until
        {
            return Ok(RateLimitDecision::Limited {
                headers: RateLimitHeaders {
                    limit: rule.limit,
                    remaining: 0,
                    reset: entry.blocked_until.timestamp(),
                },
                retry_after_secs: ceil_secs(entry.blocked_until - now),
                violations: entry.violations,
                blacklisted: true,
            });
        }

        let out_of_range = || {
            RateLimitError::OutOfRange(format!("{}s window in scope '{}'", rule.window_secs, scope))
        };
        let window = rule.window().ok_or_else(out_of_range)?;
        let grace = window.checked_mul(2).ok_or_else(out_of_range)?;
        now.checked_add_signed(grace).ok_or_else(out_of_range)?;

        let key = CounterKey::new(client_ip, scope);
        let mut snapshot = None;

        self.counters.update(
            &key,
            RateLimitCounter::new(now, rule.window_secs),
            &mut |counter| {
                counter.window_secs = rule.window_secs;

                let rolled_over = counter
                    .window_start
                    .checked_add_signed(window)
                    .is_some_and(|end| now >= end);
                if rolled_over {
                    counter.count = 0;
                    counter.window_start = now;
                    if counter.violation_count > 0 && now - counter.quiet_since() >= grace {
                        counter.violation_count -= 1;
                        counter.last_decay_at = Some(now);
                    }
                }

                counter.count = counter.count.saturating_add(1);
                if counter.count > rule.limit {
                    counter.violation_count = counter.violation_count.saturating_add(1);
                    counter.last_violation_at = Some(now);
                }

                snapshot = Some(counter.clone());
            },
        )?;

        let counter = snapshot.ok_or_else(|| {
            RateLimitError::StoreUnavailable("counter update did not run".to_string())
        })?;

        let reset_at = counter.window_end().ok_or_else(|| {
            RateLimitError::OutOfRange(format!("window end for scope '{}'", key.scope))
        })?;
        let headers = RateLimitHeaders {
            limit: rule.limit,
            remaining: rule.limit.saturating_sub(counter.count),
            reset: reset_at.timestamp(),
        };

        if counter.count > rule.limit {
            tracing::warn!(
                client_ip = %client_ip,
                scope = %key.scope,
                violations = counter.violation_count,
                "Rate limit exceeded"
            );

            let mut retry_after_secs = ceil_secs(reset_at - now);
            if counter.violation_count >= self.config.blacklist_threshold
                && let Some(blocked_until) = self.escalate(client_ip, &key, &counter, now)?
            {
                retry_after_secs = retry_after_secs.max(ceil_secs(blocked_until - now));
            }

            return Ok(RateLimitDecision::Limited {
                headers,
                retry_after_secs,
                violations: counter.violation_count,
                blacklisted: false,
            });
        }

        let in_friction_zone =
            f64::from(counter.count) > f64::from(rule.limit) * SOFT_FRICTION_RATIO;
        let delay = (in_friction_zone && counter.violation_count > 0).then(|| {
            let millis = u64::from(counter.violation_count)
                .saturating_mul(self.config.friction_step_ms)
                .min(self.config.friction_cap_ms);
            std::time::Duration::from_millis(millis)
        });

        Ok(RateLimitDecision::Allowed {
            headers: Some(headers),
            delay,
        })
    }

    /// Create or extend the client's blacklist entry
    ///
    /// Returns the stored expiry, or `None` when the store refused the entry.
    fn escalate(
        &self,
        client_ip: IpAddr,
        key: &CounterKey,
        counter: &RateLimitCounter,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, RateLimitError> {
        let blocked_until = duration_from_secs(self.config.blacklist_secs)
            .and_then(|block| now.checked_add_signed(block))
            .ok_or_else(|| {
                RateLimitError::OutOfRange(format!(
                    "{}s blacklist duration",
                    self.config.blacklist_secs
                ))
            })?;

        let entry = BlacklistEntry {
            client_ip,
            blocked_until,
            reason: format!(
                "{} rate limit violations in scope '{}'",
                counter.violation_count, key.scope
            ),
            violations: counter.violation_count,
        };

        // A failed block still rejects this request
        match self.blacklist.block(entry) {
            Ok(stored) => {
                tracing::warn!(
                    client_ip = %client_ip,
                    blocked_until = %stored.blocked_until,
                    reason = %stored.reason,
                    "Client blacklisted"
                );
                Ok(Some(stored.blocked_until))
            }
            Err(e) => {
                tracing::warn!(client_ip = %client_ip, error = %e, "Failed to blacklist client");
                Ok(None)
            }
        }
    }

    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let since_last = {
            let last = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            now - *last
        };

        let due = duration_from_secs(self.config.sweep_interval_secs)
            .is_some_and(|interval| since_last >= interval);
        let oversized = self
            .counters
            .len()
            .map(|n| n > self.config.max_tracked_keys)
            .unwrap_or(false)
            && since_last >= Duration::seconds(OVERSIZED_SWEEP_SPACING_SECS);

        if (due || oversized)
            && let Err(e) = self.sweep_at(now)
        {
            tracing::warn!(error = %e, "Rate limit sweep failed");
        }
    }

    /// Prune stale counters and expired blacklist entries
    pub fn sweep(&self) -> Result<SweepStats, RateLimitError> {
        self.sweep_at(self.clock.now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepStats, RateLimitError> {
        *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) = now;

        let stale_windows = self.config.stale_windows;
        let stats = SweepStats {
            counters_removed: self.counters.prune(&|c| c.is_stale(now, stale_windows))?,
            blacklist_removed: self.blacklist.remove_expired(now)?,
        };

        if stats != SweepStats::default() {
            tracing::debug!(
                counters_removed = stats.counters_removed,
                blacklist_removed = stats.blacklist_removed,
                "Rate limit sweep"
            );
        }

        Ok(stats)
    }

    /// Current violation count for the counter a request would hit
    pub fn violations(&self, client_ip: IpAddr, method: &Method, path: &str) -> Option<u32> {
        let (scope, _) = self.config.resolve(method, path);
        self.counters
            .get(&CounterKey::new(client_ip, scope))
            .ok()
            .flatten()
            .map(|c| c.violation_count)
    }

    /// Active or expired blacklist entry for a client
    pub fn blacklist_entry(&self, client_ip: IpAddr) -> Option<BlacklistEntry> {
        self.blacklist.get(client_ip).ok().flatten()
    }

    pub fn tracked_counters(&self) -> usize {
        self.counters.len().unwrap_or(0)
    }
}
