//! Todo Gatekeeper - authentication and rate limiting for a todo backend
//!
//! Issues JWT access tokens and rotating refresh tokens, authenticates
//! requests, and throttles clients with an adaptive rate limiter backed by
//! a temporary blacklist.

pub mod app;
pub mod core;
