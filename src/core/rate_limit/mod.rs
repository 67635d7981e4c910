//! Adaptive rate limiting
//!
//! - `config` - limits per operation class and endpoint overrides
//! - `store` - counter and blacklist storage
//! - `limiter` - the admission algorithm
//! - `middleware` - axum layer and 429 responses

pub mod config;
pub mod limiter;
pub mod middleware;
pub mod store;

pub use config::{EndpointOverride, LimitRule, OperationClass, RateLimitConfig};
pub use limiter::{AdaptiveRateLimiter, RateLimitDecision, RateLimitHeaders, SweepStats};
pub use middleware::{RateLimitState, ThrottledResponse, client_ip, rate_limit};
pub use store::{
    BlacklistEntry, BlacklistStore, CounterKey, CounterStore, InMemoryBlacklistStore,
    InMemoryCounterStore, RateLimitCounter, RateLimitError,
};
