//! Background maintenance
//!
//! Runs on its own timer, off the request path: deletes expired and
//! long-revoked refresh tokens and prunes stale rate limit state. Only
//! entries that can no longer affect a request are removed.

use chrono::Duration;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::core::auth::AuthService;
use crate::core::rate_limit::AdaptiveRateLimiter;

/// Result of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub tokens_removed: u64,
    pub counters_removed: usize,
    pub blacklist_removed: usize,
}

/// Periodic cleanup of the token ledger and rate limiter
pub struct CleanupTask {
    auth_service: AuthService,
    limiter: Arc<AdaptiveRateLimiter>,
    interval: std::time::Duration,
    revoked_retention: Duration,
}

impl CleanupTask {
    pub fn new(
        auth_service: AuthService,
        limiter: Arc<AdaptiveRateLimiter>,
        interval: std::time::Duration,
        revoked_retention: Duration,
    ) -> Self {
        Self {
            auth_service,
            limiter,
            interval,
            revoked_retention,
        }
    }

    /// Run a single pass, logging failures instead of returning them
    pub async fn run_once(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self
            .auth_service
            .cleanup_expired_tokens(self.revoked_retention)
            .await
        {
            Ok(removed) => report.tokens_removed = removed,
            Err(e) => tracing::error!(error = %e, "Refresh token cleanup failed"),
        }

        match self.limiter.sweep() {
            Ok(stats) => {
                report.counters_removed = stats.counters_removed;
                report.blacklist_removed = stats.blacklist_removed;
            }
            Err(e) => tracing::error!(error = %e, "Rate limit sweep failed"),
        }

        if report != CleanupReport::default() {
            tracing::info!(
                tokens_removed = report.tokens_removed,
                counters_removed = report.counters_removed,
                blacklist_removed = report.blacklist_removed,
                "Cleanup completed"
            );
        }

        report
    }

    /// Spawn the cleanup loop
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // The first tick fires immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::{JwtConfig, JwtService, PasswordConfig, PasswordHasher, RegisterRequest};
    use crate::core::clock::ManualClock;
    use crate::core::db::{InMemoryTokenLedger, InMemoryUserStore};
    use crate::core::rate_limit::RateLimitConfig;
    use axum::http::Method;

    #[tokio::test]
    async fn test_run_once_removes_dead_state() {
        let clock = Arc::new(ManualClock::starting_now());
        let ledger = Arc::new(InMemoryTokenLedger::new());
        let auth_service = AuthService::new(
            Arc::new(InMemoryUserStore::new()),
            ledger.clone(),
            JwtService::with_clock(JwtConfig::new("cleanup_test_secret"), clock.clone()),
            PasswordHasher::new(PasswordConfig::new(4).unwrap()),
            clock.clone(),
        );
        let limiter = Arc::new(AdaptiveRateLimiter::new(
            RateLimitConfig::default(),
            clock.clone(),
        ));

        let registered = auth_service
            .register(RegisterRequest {
                email: "cleanup@example.com".to_string(),
                password: "Password123".to_string(),
                name: None,
            })
            .await
            .unwrap();
        // Rotation leaves one revoked and one active entry
        auth_service
            .refresh(&registered.tokens.refresh_token)
            .await
            .unwrap();
        limiter.check("192.0.2.1".parse().unwrap(), &Method::GET, "/api/auth/me");

        let task = CleanupTask::new(
            auth_service,
            limiter.clone(),
            std::time::Duration::from_secs(3600),
            Duration::days(1),
        );

        assert_eq!(task.run_once().await, CleanupReport::default());

        clock.advance(Duration::days(2));
        let report = task.run_once().await;

        assert_eq!(report.tokens_removed, 1);
        assert_eq!(report.counters_removed, 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(limiter.tracked_counters(), 0);
    }
}
