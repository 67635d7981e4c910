//! Shared helpers for HTTP-level tests
#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, header},
    response::Response,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use todo_gatekeeper::app::AppState;
use todo_gatekeeper::core::auth::{JwtConfig, PasswordConfig};
use todo_gatekeeper::core::clock::ManualClock;
use todo_gatekeeper::core::config::AppConfig;
use todo_gatekeeper::core::rate_limit::RateLimitConfig;
use tower::ServiceExt;

pub const CLIENT: &str = "192.0.2.1:40000";
pub const PASSWORD: &str = "Password123";

pub fn test_config(rate_limit: RateLimitConfig) -> AppConfig {
    let mut config = AppConfig::from_parts(
        &|_: &str| -> Option<String> { None },
        JwtConfig::new("integration_test_secret"),
        PasswordConfig::new(4).unwrap(),
        None,
    )
    .unwrap();
    config.rate_limit = rate_limit;
    config
}

pub struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_rate_limit(RateLimitConfig::default())
    }

    pub fn with_rate_limit(rate_limit: RateLimitConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let state = AppState::in_memory(&test_config(rate_limit), clock.clone());
        Self::from_state(state, clock)
    }

    pub fn from_state(state: AppState, clock: Arc<ManualClock>) -> Self {
        let router = state.router();
        Self {
            state,
            clock,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.send_from(CLIENT, request).await
    }

    pub async fn send_from(&self, peer: &str, mut request: Request<Body>) -> Response {
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Register a user and return the `{user, tokens}` body
    pub async fn register(&self, email: &str) -> Value {
        let response = self
            .send(json_request(
                Method::POST,
                "/api/auth/register",
                serde_json::json!({ "email": email, "password": PASSWORD, "name": "Test User" }),
            ))
            .await;
        assert_eq!(response.status(), 201);
        body_json(response).await
    }

    pub async fn login(&self, email: &str) -> Value {
        let response = self
            .send(json_request(
                Method::POST,
                "/api/auth/login",
                serde_json::json!({ "email": email, "password": PASSWORD }),
            ))
            .await;
        assert_eq!(response.status(), 200);
        body_json(response).await
    }
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token).parse().unwrap(),
    );
    request
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn header_str<'a>(response: &'a Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

pub fn token(body: &Value, name: &str) -> String {
    body["tokens"][name].as_str().unwrap().to_string()
}
