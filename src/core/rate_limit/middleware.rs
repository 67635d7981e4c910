//! Rate limiting middleware
//!
//! Applies [`AdaptiveRateLimiter`] to every request before routing. Allowed
//! responses carry `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset`; rejections are `429` with `Retry-After`.

use axum::{
    Json,
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::core::error::ErrorKind;
use crate::core::rate_limit::limiter::{AdaptiveRateLimiter, RateLimitDecision, RateLimitHeaders};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Shared state for [`rate_limit`]
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<AdaptiveRateLimiter>,
    /// Reverse proxies appending to `X-Forwarded-For`; 0 trusts only the socket
    pub trusted_proxy_count: usize,
}

impl RateLimitState {
    pub fn new(limiter: Arc<AdaptiveRateLimiter>, trusted_proxy_count: usize) -> Self {
        Self {
            limiter,
            trusted_proxy_count,
        }
    }
}

impl RateLimitHeaders {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
    }
}

/// Resolve the client address
///
/// With `n` trusted proxies the client is the `n`-th `X-Forwarded-For` entry
/// from the right, since entries further left are client-controlled. Falls
/// back to the socket peer address.
pub fn client_ip(request: &Request, trusted_proxy_count: usize) -> Option<IpAddr> {
    if trusted_proxy_count > 0
        && let Some(ip) = forwarded_ip(request.headers(), trusted_proxy_count)
    {
        return Some(ip);
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn forwarded_ip(headers: &HeaderMap, trusted_proxy_count: usize) -> Option<IpAddr> {
    let hops: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .collect();

    let index = hops.len().checked_sub(trusted_proxy_count)?;
    hops.get(index)?.parse().ok()
}

/// Rejection body for throttled requests
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThrottledBody {
    error: &'static str,
    code: &'static str,
    retry_after: u64,
    violations: u32,
}

/// `429 Too Many Requests` response
#[derive(Debug, Clone)]
pub struct ThrottledResponse {
    pub headers: RateLimitHeaders,
    pub retry_after_secs: u64,
    pub violations: u32,
}

impl IntoResponse for ThrottledResponse {
    fn into_response(self) -> Response {
        let body = ThrottledBody {
            error: "Too many requests",
            code: "RATE_LIMITED",
            retry_after: self.retry_after_secs,
            violations: self.violations,
        };

        let mut response = (ErrorKind::Throttled.status(), Json(body)).into_response();
        let headers = response.headers_mut();
        self.headers.apply(headers);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after_secs));
        response
    }
}

/// Middleware enforcing the adaptive rate limit
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&request, state.trusted_proxy_count) else {
        tracing::warn!("Could not determine client address, skipping rate limit");
        return next.run(request).await;
    };

    // Nested routers see a stripped URI
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    match state.limiter.check(ip, request.method(), &path) {
        RateLimitDecision::Allowed { headers, delay } => {
            if let Some(delay) = delay {
                tracing::debug!(
                    client_ip = %ip,
                    delay_ms = delay.as_millis() as u64,
                    "Applying soft friction"
                );
                tokio::time::sleep(delay).await;
            }

            let mut response = next.run(request).await;
            if let Some(headers) = headers {
                headers.apply(response.headers_mut());
            }
            response
        }
        RateLimitDecision::Limited {
            headers,
            retry_after_secs,
            violations,
            ..
        } => ThrottledResponse {
            headers,
            retry_after_secs,
            violations,
        }
        .into_response(),
    }
}
