//! Application configuration
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file). Component configs expose `from_env()`; the variable source
//! is injectable through `from_vars()` so parsing is testable without
//! touching the process environment.

use std::fmt::Display;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::core::auth::jwt::JwtConfig;
use crate::core::auth::password::PasswordConfig;
use crate::core::db::pool::DbConfig;
use crate::core::rate_limit::RateLimitConfig;

/// Development-only signing secret
const DEV_JWT_SECRET: &str = "todo_gatekeeper_dev_secret_key_not_for_production";

/// Upper bound for token lifetimes and retention periods (365 days)
pub const MAX_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

/// Parse `key` from `var`, using `default` when unset
pub(crate) fn parse_or_default<T>(
    var: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        None => Ok(default),
    }
}

/// Like [`parse_or_default`], rejecting values outside `range`
pub(crate) fn parse_in_range<T>(
    var: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let value = parse_or_default(var, key, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("{} is outside {}..={}", value, range.start(), range.end()),
        ))
    }
}

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs on in-memory stores
    pub database: Option<DbConfig>,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub rate_limit: RateLimitConfig,
    /// Seconds between background cleanup runs
    pub cleanup_interval_secs: u64,
    /// How long revoked refresh tokens are kept before the sweep deletes them
    pub refresh_revoked_retention_secs: i64,
    /// Number of reverse proxies in front of the server
    pub trusted_proxy_count: usize,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Missing .env is fine, variables may be set directly
        let _ = dotenvy::dotenv();

        let var = |key: &str| std::env::var(key).ok();

        let jwt = match JwtConfig::from_vars(&var) {
            Ok(config) => config,
            Err(ConfigError::MissingVar(_)) if cfg!(debug_assertions) => {
                tracing::warn!("JWT_SECRET not set, using development secret");
                JwtConfig::new(DEV_JWT_SECRET).with_vars(&var)?
            }
            Err(e) => return Err(e),
        };

        let password = PasswordConfig::from_vars(&var)?;

        let database = DbConfig::from_env().ok();

        Self::from_parts(&var, jwt, password, database)
    }

    /// Assemble the config from already-parsed component configs
    pub fn from_parts(
        var: &dyn Fn(&str) -> Option<String>,
        jwt: JwtConfig,
        password: PasswordConfig,
        database: Option<DbConfig>,
    ) -> Result<Self, ConfigError> {
        let bind_addr_str = var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;

        let cleanup_interval_secs = parse_in_range(
            var,
            "CLEANUP_INTERVAL_SECS",
            3600,
            1..=MAX_LIFETIME_SECS as u64,
        )?;

        let refresh_revoked_retention_secs = parse_in_range(
            var,
            "REFRESH_REVOKED_RETENTION_SECS",
            86_400,
            1..=MAX_LIFETIME_SECS,
        )?;
        let trusted_proxy_count = parse_or_default(var, "TRUSTED_PROXY_COUNT", 0)?;
        let rate_limit = RateLimitConfig::from_vars(var)?;

        Ok(Self {
            bind_addr,
            database,
            jwt,
            password,
            rate_limit,
            cleanup_interval_secs,
            refresh_revoked_retention_secs,
            trusted_proxy_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn build(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        AppConfig::from_parts(
            &vars(pairs),
            JwtConfig::new("secret"),
            PasswordConfig::default(),
            None,
        )
    }

    #[test]
    fn test_parse_or_default() {
        let source = vars(&[("TEST_U64", "12345"), ("TEST_BAD", "abc")]);

        let value: u64 = parse_or_default(&source, "TEST_U64", 100).unwrap();
        assert_eq!(value, 12345);

        let value: u64 = parse_or_default(&source, "TEST_MISSING", 100).unwrap();
        assert_eq!(value, 100);

        let result: Result<u64, _> = parse_or_default(&source, "TEST_BAD", 100);
        assert!(matches!(result, Err(ConfigError::ParseError(key, _)) if key == "TEST_BAD"));
    }

    #[test]
    fn test_defaults() {
        let config = build(&[]).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(config.cleanup_interval_secs, 3600);
        assert_eq!(config.refresh_revoked_retention_secs, 86_400);
        assert_eq!(config.trusted_proxy_count, 0);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = build(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("CLEANUP_INTERVAL_SECS", "60"),
            ("TRUSTED_PROXY_COUNT", "2"),
            ("RATE_LIMIT_READ", "50/30"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.cleanup_interval_secs, 60);
        assert_eq!(config.trusted_proxy_count, 2);
        assert_eq!(config.rate_limit.read.limit, 50);
    }

    #[test]
    fn test_invalid_bind_addr() {
        let result = build(&[("BIND_ADDR", "not-an-address")]);
        assert!(matches!(result, Err(ConfigError::ParseError(key, _)) if key == "BIND_ADDR"));
    }

    #[test]
    fn test_zero_cleanup_interval_rejected() {
        let result = build(&[("CLEANUP_INTERVAL_SECS", "0")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue(..))));

        let result = build(&[("CLEANUP_INTERVAL_SECS", "18446744073709551615")]);
        assert!(matches!(result, Err(ConfigError::InvalidValue(..))));
    }

    #[test]
    fn test_parse_in_range() {
        let source = vars(&[("TEST_SMALL", "5"), ("TEST_BIG", "500")]);

        let value: u64 = parse_in_range(&source, "TEST_SMALL", 1, 1..=10).unwrap();
        assert_eq!(value, 5);

        let value: u64 = parse_in_range(&source, "TEST_MISSING", 7, 1..=10).unwrap();
        assert_eq!(value, 7);

        let result: Result<u64, _> = parse_in_range(&source, "TEST_BIG", 1, 1..=10);
        assert!(matches!(result, Err(ConfigError::InvalidValue(key, _)) if key == "TEST_BIG"));
    }

    #[test]
    fn test_retention_must_be_positive_and_bounded() {
        for value in ["0", "-60", "9223372036854775807"] {
            let result = build(&[("REFRESH_REVOKED_RETENTION_SECS", value)]);
            let rejected = matches!(&result, Err(ConfigError::InvalidValue(..)));
            assert!(rejected, "retention {} was accepted", value);
        }

        let result = build(&[("REFRESH_REVOKED_RETENTION_SECS", "a day")]);
        assert!(matches!(result, Err(ConfigError::ParseError(..))));

        let config = build(&[("REFRESH_REVOKED_RETENTION_SECS", "3600")]).unwrap();
        assert_eq!(config.refresh_revoked_retention_secs, 3600);
    }

    #[test]
    fn test_debug_redacts_jwt_secret() {
        let config = AppConfig::from_parts(
            &vars(&[]),
            JwtConfig::new("very-private-signing-key"),
            PasswordConfig::default(),
            None,
        )
        .unwrap();

        assert!(!format!("{:?}", config).contains("very-private-signing-key"));
    }
}
