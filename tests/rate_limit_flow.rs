//! Rate limiting behaviour over HTTP

mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use common::{TestApp, body_json, get, header_str, json_request, test_config};
use serde_json::json;
use std::net::IpAddr;
use std::sync::Arc;
use todo_gatekeeper::app::AppState;
use todo_gatekeeper::core::clock::ManualClock;
use todo_gatekeeper::core::rate_limit::{
    AdaptiveRateLimiter, CounterKey, CounterStore, InMemoryBlacklistStore, LimitRule,
    OperationClass, RateLimitConfig, RateLimitCounter, RateLimitError,
};

fn reads(limit: u32, window_secs: u64) -> RateLimitConfig {
    RateLimitConfig::default()
        .with_class_rule(OperationClass::Read, LimitRule::new(limit, window_secs))
}

fn client_ip() -> IpAddr {
    common::CLIENT.parse::<std::net::SocketAddr>().unwrap().ip()
}

#[tokio::test]
async fn test_remaining_counts_down_then_throttles() {
    let app = TestApp::with_rate_limit(reads(5, 60));

    for expected in (0..5).rev() {
        let response = app.send(get("/api/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, "x-ratelimit-limit"), "5");
        assert_eq!(
            header_str(&response, "x-ratelimit-remaining"),
            expected.to_string()
        );
    }

    let response = app.send(get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), "60");
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), "0");

    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["retryAfter"], 60);
    assert_eq!(body["violations"], 1);
}

#[tokio::test]
async fn test_thirty_one_reads_within_budget() {
    let app = TestApp::new();
    let mut resets = Vec::new();

    for i in 0..31 {
        let response = app.send(get("/api/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_str(&response, "x-ratelimit-remaining"),
            (99 - i).to_string()
        );
        resets.push(header_str(&response, "x-ratelimit-reset").to_string());
        app.clock.advance(Duration::seconds(1));
    }

    assert!(resets.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn test_window_rollover_restores_budget() {
    let app = TestApp::with_rate_limit(reads(2, 60));
    for _ in 0..3 {
        app.send(get("/api/health")).await;
    }

    app.clock.advance(Duration::seconds(60));
    let response = app.send(get("/api/health")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), "1");
}

#[tokio::test]
async fn test_login_override_is_tighter_than_class_default() {
    let app = TestApp::new();
    let attempt = || {
        json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "email": "nobody@example.com", "password": "Password123" }),
        )
    };

    for _ in 0..10 {
        let response = app.send(attempt()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(header_str(&response, "x-ratelimit-limit"), "10");
    }

    let response = app.send(attempt()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Other scopes keep their own budget
    let response = app.send(get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_clients_are_isolated() {
    let app = TestApp::with_rate_limit(reads(1, 60));

    app.send(get("/api/health")).await;
    let response = app.send(get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.send_from("198.51.100.20:1234", get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blacklist_escalation_and_expiry() {
    let app = TestApp::with_rate_limit(reads(1, 60).with_blacklist(2, 300));

    assert_eq!(app.send(get("/api/health")).await.status(), StatusCode::OK);
    assert_eq!(
        app.send(get("/api/health")).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let response = app.send(get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), "300");
    assert!(app.state.limiter.blacklist_entry(client_ip()).is_some());

    // Window has rolled over but the block holds, for every scope
    app.clock.advance(Duration::seconds(120));
    let response = app.send(get("/api/health")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header_str(&response, "retry-after"), "180");
    assert_eq!(header_str(&response, "x-ratelimit-remaining"), "0");

    let response = app
        .send(json_request(
            Method::POST,
            "/api/auth/login",
            json!({ "email": "a@example.com", "password": "Password123" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    app.clock.advance(Duration::seconds(180));
    assert_eq!(app.send(get("/api/health")).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_violations_decay_after_quiet_windows() {
    let app = TestApp::with_rate_limit(reads(2, 60).with_sweep_interval(86_400));
    for _ in 0..4 {
        app.send(get("/api/health")).await;
    }
    let violations = || {
        app.state
            .limiter
            .violations(client_ip(), &Method::GET, "/api/health")
    };
    assert_eq!(violations(), Some(2));

    app.clock.advance(Duration::seconds(60));
    app.send(get("/api/health")).await;
    assert_eq!(violations(), Some(2));

    app.clock.advance(Duration::seconds(60));
    app.send(get("/api/health")).await;
    assert_eq!(violations(), Some(1));
}

#[tokio::test]
async fn test_forwarded_for_behind_trusted_proxy() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut state = AppState::in_memory(&test_config(reads(1, 60)), clock.clone());
    state.trusted_proxy_count = 1;
    let app = TestApp::from_state(state, clock);

    let from_client = |client: &str| {
        let mut request = get("/api/health");
        request
            .headers_mut()
            .insert("x-forwarded-for", client.parse().unwrap());
        request
    };

    for client in ["203.0.113.5", "203.0.113.6"] {
        let response = app.send_from("10.0.0.1:443", from_client(client)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .send_from("10.0.0.1:443", from_client("203.0.113.5"))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

struct UnavailableCounters;

impl CounterStore for UnavailableCounters {
    fn update(
        &self,
        _key: &CounterKey,
        _init: RateLimitCounter,
        _apply: &mut dyn FnMut(&mut RateLimitCounter),
    ) -> Result<(), RateLimitError> {
        Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
    }

    fn get(&self, _key: &CounterKey) -> Result<Option<RateLimitCounter>, RateLimitError> {
        Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
    }

    fn len(&self) -> Result<usize, RateLimitError> {
        Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
    }

    fn prune(
        &self,
        _remove: &dyn Fn(&RateLimitCounter) -> bool,
    ) -> Result<usize, RateLimitError> {
        Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_store_outage_fails_open() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut state = AppState::in_memory(&test_config(reads(1, 60)), clock.clone());
    state.limiter = Arc::new(AdaptiveRateLimiter::with_stores(
        reads(1, 60),
        Arc::new(UnavailableCounters),
        Arc::new(InMemoryBlacklistStore::new()),
        clock.clone(),
    ));
    let app = TestApp::from_state(state, clock);

    for _ in 0..5 {
        let response = app.send(get("/api/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}
