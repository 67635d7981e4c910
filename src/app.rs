//! Application assembly
//!
//! Wires stores, services and the rate limiter together and builds the
//! HTTP router. Every request passes the rate limiter first; protected
//! routes then authenticate the bearer token.

use axum::{Json, Router, middleware, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::core::auth::{AuthService, JwtService, PasswordHasher, auth_api_router};
use crate::core::cleanup::CleanupTask;
use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::db::{
    DbError, InMemoryTokenLedger, InMemoryUserStore, RefreshTokenRepository, TokenLedger,
    UserRepository, UserStore, create_pool_with_migrations,
};
use crate::core::rate_limit::{AdaptiveRateLimiter, RateLimitState, rate_limit};

/// Shared application services
#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub limiter: Arc<AdaptiveRateLimiter>,
    pub trusted_proxy_count: usize,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let jwt_service = JwtService::with_clock(config.jwt.clone(), clock.clone());
        let passwords = PasswordHasher::new(config.password);
        let auth_service = AuthService::new(users, ledger, jwt_service, passwords, clock.clone());
        let limiter = Arc::new(AdaptiveRateLimiter::new(config.rate_limit.clone(), clock));

        Self {
            auth_service,
            limiter,
            trusted_proxy_count: config.trusted_proxy_count,
        }
    }

    /// State backed by in-memory stores
    pub fn in_memory(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryTokenLedger::new()),
            clock,
        )
    }

    /// PostgreSQL-backed state when a database is configured, in-memory otherwise
    pub async fn connect(config: &AppConfig) -> Result<Self, DbError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let Some(db_config) = &config.database else {
            tracing::warn!("DATABASE_URL not set, using in-memory stores; data is lost on restart");
            return Ok(Self::in_memory(config, clock));
        };

        let pool = create_pool_with_migrations(db_config).await?;
        tracing::info!("Database connection pool created and migrations applied");

        Ok(Self::new(
            config,
            Arc::new(UserRepository::new(pool.clone())),
            Arc::new(RefreshTokenRepository::new(pool)),
            clock,
        ))
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let api = auth_api_router(self.auth_service.clone()).route("/health", get(health));

        Router::new()
            .nest("/api", api)
            .layer(middleware::from_fn_with_state(
                RateLimitState::new(self.limiter.clone(), self.trusted_proxy_count),
                rate_limit,
            ))
            .layer(TraceLayer::new_for_http())
    }

    /// Background cleanup for the ledger and the rate limiter
    pub fn cleanup_task(&self, config: &AppConfig) -> CleanupTask {
        CleanupTask::new(
            self.auth_service.clone(),
            self.limiter.clone(),
            std::time::Duration::from_secs(config.cleanup_interval_secs),
            chrono::Duration::seconds(config.refresh_revoked_retention_secs),
        )
    }
}

/// GET /api/health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
