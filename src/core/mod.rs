//! Core request gatekeeping: authentication, rate limiting and persistence

pub mod auth;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod rate_limit;
