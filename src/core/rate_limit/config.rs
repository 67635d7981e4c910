//! Rate limiter configuration
//!
//! Limits are expressed as `limit/window_secs`. Per-endpoint overrides are
//! keyed by `"METHOD /path"`; a trailing `*` on the path matches any suffix.

use axum::http::Method;
use chrono::Duration;

use crate::core::config::{ConfigError, parse_in_range, parse_or_default};
use crate::core::rate_limit::store::duration_from_secs;

/// Longest accepted window, blacklist duration or sweep interval (30 days)
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted soft-friction delay
pub const MAX_FRICTION_MS: u64 = 60_000;

/// Coarse request category used to pick a default limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationClass {
    Read,
    Write,
    Delete,
}

impl OperationClass {
    /// Classify an HTTP method
    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::POST | Method::PUT | Method::PATCH => OperationClass::Write,
            Method::DELETE => OperationClass::Delete,
            // GET, HEAD, OPTIONS and anything unusual
            _ => OperationClass::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request budget per fixed window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRule {
    pub limit: u32,
    pub window_secs: u64,
}

impl LimitRule {
    pub const fn new(limit: u32, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    /// `None` when the window does not fit in a `Duration`
    pub fn window(&self) -> Option<Duration> {
        duration_from_secs(self.window_secs)
    }
}

impl std::str::FromStr for LimitRule {
    type Err = String;

    /// Parse `limit/window_secs`, e.g. `100/60`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (limit, window) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("expected limit/window_secs, got '{}'", s))?;
        let limit: u32 = limit
            .trim()
            .parse()
            .map_err(|e| format!("bad limit '{}': {}", limit, e))?;
        let window_secs: u64 = window
            .trim()
            .parse()
            .map_err(|e| format!("bad window '{}': {}", window, e))?;
        if limit == 0 || window_secs == 0 {
            return Err("limit and window must be greater than zero".to_string());
        }
        if window_secs > MAX_DURATION_SECS {
            return Err(format!("window must be at most {} seconds", MAX_DURATION_SECS));
        }
        Ok(Self { limit, window_secs })
    }
}

/// Endpoint-specific limit overriding the operation class default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOverride {
    pub method: Method,
    /// Exact path, or a prefix when it ends with `*`
    pub path: String,
    pub rule: LimitRule,
}

impl EndpointOverride {
    /// Parse `"METHOD /path"`
    pub fn new(key: &str, rule: LimitRule) -> Result<Self, String> {
        let (method, path) = key
            .trim()
            .split_once(' ')
            .ok_or_else(|| format!("expected 'METHOD /path', got '{}'", key))?;
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| format!("bad method '{}': {}", method, e))?;
        let path = path.trim();
        if !path.starts_with('/') {
            return Err(format!("path must start with '/', got '{}'", path));
        }
        Ok(Self {
            method,
            path: path.to_string(),
            rule,
        })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method != *method {
            return false;
        }
        match self.path.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => self.path == path,
        }
    }

    /// Counter scope, shared by every path the override matches
    pub fn scope(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub read: LimitRule,
    pub write: LimitRule,
    pub delete: LimitRule,
    /// Checked in order, first match wins
    pub overrides: Vec<EndpointOverride>,
    /// Violations that trigger a blacklist entry
    pub blacklist_threshold: u32,
    /// Blacklist cool-down
    pub blacklist_secs: u64,
    /// Delay added per violation in the soft-friction zone
    pub friction_step_ms: u64,
    /// Upper bound on the soft-friction delay
    pub friction_cap_ms: u64,
    /// Tracked counters above which a sweep is forced
    pub max_tracked_keys: usize,
    /// Seconds between opportunistic sweeps
    pub sweep_interval_secs: u64,
    /// Windows a counter must sit idle before it can be pruned
    pub stale_windows: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let rule = |limit, window| LimitRule::new(limit, window);
        let sensitive = [
            ("POST /api/auth/login", rule(10, 60)),
            ("POST /api/auth/register", rule(5, 60)),
            ("POST /api/auth/refresh", rule(20, 60)),
        ];

        Self {
            read: rule(100, 60),
            write: rule(30, 60),
            delete: rule(10, 60),
            overrides: sensitive
                .iter()
                .filter_map(|(key, rule)| EndpointOverride::new(key, *rule).ok())
                .collect(),
            blacklist_threshold: 5,
            blacklist_secs: 900,
            friction_step_ms: 100,
            friction_cap_ms: 1000,
            max_tracked_keys: 10_000,
            sweep_interval_secs: 300,
            stale_windows: 2,
        }
    }
}

impl RateLimitConfig {
    /// Read configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&|key: &str| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary variable source
    pub fn from_vars(var: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut config = Self {
            read: parse_or_default(var, "RATE_LIMIT_READ", defaults.read)?,
            write: parse_or_default(var, "RATE_LIMIT_WRITE", defaults.write)?,
            delete: parse_or_default(var, "RATE_LIMIT_DELETE", defaults.delete)?,
            blacklist_threshold: parse_or_default(
                var,
                "RATE_LIMIT_BLACKLIST_THRESHOLD",
                defaults.blacklist_threshold,
            )?,
            blacklist_secs: parse_in_range(
                var,
                "RATE_LIMIT_BLACKLIST_SECS",
                defaults.blacklist_secs,
                1..=MAX_DURATION_SECS,
            )?,
            max_tracked_keys: parse_or_default(
                var,
                "RATE_LIMIT_MAX_KEYS",
                defaults.max_tracked_keys,
            )?,
            sweep_interval_secs: parse_in_range(
                var,
                "RATE_LIMIT_SWEEP_SECS",
                defaults.sweep_interval_secs,
                1..=MAX_DURATION_SECS,
            )?,
            friction_step_ms: parse_in_range(
                var,
                "RATE_LIMIT_FRICTION_STEP_MS",
                defaults.friction_step_ms,
                0..=MAX_FRICTION_MS,
            )?,
            friction_cap_ms: parse_in_range(
                var,
                "RATE_LIMIT_FRICTION_CAP_MS",
                defaults.friction_cap_ms,
                0..=MAX_FRICTION_MS,
            )?,
            ..defaults
        };

        if let Some(raw) = var("RATE_LIMIT_OVERRIDES") {
            config.overrides = Self::parse_overrides(&raw).map_err(|e| {
                ConfigError::ParseError("RATE_LIMIT_OVERRIDES".to_string(), e)
            })?;
        }

        if config.blacklist_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_BLACKLIST_THRESHOLD".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    /// Parse `METHOD /path=limit/window_secs` entries separated by commas
    pub fn parse_overrides(raw: &str) -> Result<Vec<EndpointOverride>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (key, rule) = entry
                    .rsplit_once('=')
                    .ok_or_else(|| format!("expected KEY=limit/window, got '{}'", entry))?;
                EndpointOverride::new(key, rule.parse()?)
            })
            .collect()
    }

    /// Default rule for an operation class
    pub fn class_rule(&self, class: OperationClass) -> LimitRule {
        match class {
            OperationClass::Read => self.read,
            OperationClass::Write => self.write,
            OperationClass::Delete => self.delete,
        }
    }

    /// Resolve the counter scope and rule for a request
    pub fn resolve(&self, method: &Method, path: &str) -> (String, LimitRule) {
        if let Some(endpoint) = self.overrides.iter().find(|o| o.matches(method, path)) {
            return (endpoint.scope(), endpoint.rule);
        }
        let class = OperationClass::from_method(method);
        (class.as_str().to_string(), self.class_rule(class))
    }

    pub fn with_class_rule(mut self, class: OperationClass, rule: LimitRule) -> Self {
        match class {
            OperationClass::Read => self.read = rule,
            OperationClass::Write => self.write = rule,
            OperationClass::Delete => self.delete = rule,
        }
        self
    }

    pub fn with_override(mut self, key: &str, rule: LimitRule) -> Result<Self, String> {
        self.overrides.push(EndpointOverride::new(key, rule)?);
        Ok(self)
    }

    pub fn without_overrides(mut self) -> Self {
        self.overrides.clear();
        self
    }

    pub fn with_blacklist(mut self, threshold: u32, secs: u64) -> Self {
        self.blacklist_threshold = threshold;
        self.blacklist_secs = secs;
        self
    }

    pub fn with_friction(mut self, step_ms: u64, cap_ms: u64) -> Self {
        self.friction_step_ms = step_ms;
        self.friction_cap_ms = cap_ms;
        self
    }

    pub fn with_max_tracked_keys(mut self, max: usize) -> Self {
        self.max_tracked_keys = max;
        self
    }

    pub fn with_sweep_interval(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_operation_class_from_method() {
        assert_eq!(OperationClass::from_method(&Method::GET), OperationClass::Read);
        assert_eq!(OperationClass::from_method(&Method::HEAD), OperationClass::Read);
        assert_eq!(
            OperationClass::from_method(&Method::OPTIONS),
            OperationClass::Read
        );
        assert_eq!(OperationClass::from_method(&Method::POST), OperationClass::Write);
        assert_eq!(OperationClass::from_method(&Method::PUT), OperationClass::Write);
        assert_eq!(OperationClass::from_method(&Method::PATCH), OperationClass::Write);
        assert_eq!(
            OperationClass::from_method(&Method::DELETE),
            OperationClass::Delete
        );
    }

    #[test]
    fn test_limit_rule_parse() {
        assert_eq!("100/60".parse::<LimitRule>().unwrap(), LimitRule::new(100, 60));
        assert_eq!(" 5 / 1 ".parse::<LimitRule>().unwrap(), LimitRule::new(5, 1));
        assert!("100".parse::<LimitRule>().is_err());
        assert!("0/60".parse::<LimitRule>().is_err());
        assert!("10/0".parse::<LimitRule>().is_err());
        assert!("x/60".parse::<LimitRule>().is_err());
        assert!("1/2592000".parse::<LimitRule>().is_ok());
        assert!("1/2592001".parse::<LimitRule>().is_err());
        assert!("1/10000000000000".parse::<LimitRule>().is_err());
        assert!("1/18446744073709551615".parse::<LimitRule>().is_err());
    }

    #[test]
    fn test_override_exact_match() {
        let o = EndpointOverride::new("POST /api/auth/login", LimitRule::new(5, 60)).unwrap();

        assert!(o.matches(&Method::POST, "/api/auth/login"));
        assert!(!o.matches(&Method::GET, "/api/auth/login"));
        assert!(!o.matches(&Method::POST, "/api/auth/login/extra"));
        assert_eq!(o.scope(), "POST /api/auth/login");
    }

    #[test]
    fn test_override_prefix_match() {
        let o = EndpointOverride::new("delete /api/todos/*", LimitRule::new(3, 60)).unwrap();

        assert!(o.matches(&Method::DELETE, "/api/todos/42"));
        assert!(o.matches(&Method::DELETE, "/api/todos/"));
        assert!(!o.matches(&Method::DELETE, "/api/tags/1"));
    }

    #[test]
    fn test_override_rejects_malformed_key() {
        assert!(EndpointOverride::new("/api/no-method", LimitRule::new(1, 1)).is_err());
        assert!(EndpointOverride::new("GET api/no-slash", LimitRule::new(1, 1)).is_err());
    }

    #[test]
    fn test_resolve_prefers_override() {
        let config = RateLimitConfig::default();

        let (scope, rule) = config.resolve(&Method::POST, "/api/auth/login");
        assert_eq!(scope, "POST /api/auth/login");
        assert_eq!(rule, LimitRule::new(10, 60));

        let (scope, rule) = config.resolve(&Method::GET, "/api/health");
        assert_eq!(scope, "read");
        assert_eq!(rule, LimitRule::new(100, 60));

        let (scope, rule) = config.resolve(&Method::DELETE, "/api/todos/1");
        assert_eq!(scope, "delete");
        assert_eq!(rule, LimitRule::new(10, 60));
    }

    #[test]
    fn test_parse_overrides() {
        let overrides =
            RateLimitConfig::parse_overrides("POST /api/auth/login=5/60, DELETE /api/todos/*=2/30")
                .unwrap();

        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[1].rule, LimitRule::new(2, 30));
        assert!(RateLimitConfig::parse_overrides("POST /x").is_err());
        assert!(RateLimitConfig::parse_overrides("").unwrap().is_empty());
    }

    #[test]
    fn test_from_vars() {
        let map: HashMap<&str, &str> = [
            ("RATE_LIMIT_WRITE", "7/10"),
            ("RATE_LIMIT_OVERRIDES", "PUT /api/todos/*=4/60"),
            ("RATE_LIMIT_BLACKLIST_THRESHOLD", "3"),
        ]
        .into_iter()
        .collect();
        let config =
            RateLimitConfig::from_vars(&|key: &str| map.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.write, LimitRule::new(7, 10));
        assert_eq!(config.read, LimitRule::new(100, 60));
        assert_eq!(config.overrides.len(), 1);
        assert_eq!(config.blacklist_threshold, 3);
    }

    #[test]
    fn test_from_vars_rejects_bad_rule() {
        let result = RateLimitConfig::from_vars(&|key: &str| {
            (key == "RATE_LIMIT_READ").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ParseError(..))));
    }

    fn from_single(key: &'static str, value: &'static str) -> Result<RateLimitConfig, ConfigError> {
        RateLimitConfig::from_vars(&|k: &str| (k == key).then(|| value.to_string()))
    }

    #[test]
    fn test_from_vars_rejects_oversized_durations() {
        for (key, value) in [
            ("RATE_LIMIT_BLACKLIST_SECS", "10000000000000"),
            ("RATE_LIMIT_BLACKLIST_SECS", "18446744073709551615"),
            ("RATE_LIMIT_BLACKLIST_SECS", "0"),
            ("RATE_LIMIT_SWEEP_SECS", "2592001"),
            ("RATE_LIMIT_FRICTION_STEP_MS", "60001"),
            ("RATE_LIMIT_FRICTION_CAP_MS", "18446744073709551615"),
        ] {
            let result = from_single(key, value);
            assert!(
                matches!(&result, Err(ConfigError::InvalidValue(k, _)) if k == key),
                "{}={} was accepted",
                key,
                value
            );
        }

        let result = from_single("RATE_LIMIT_READ", "1/10000000000000");
        assert!(matches!(result, Err(ConfigError::ParseError(..))));
    }

    #[test]
    fn test_from_vars_friction() {
        let config = from_single("RATE_LIMIT_FRICTION_CAP_MS", "2500").unwrap();
        assert_eq!(config.friction_cap_ms, 2500);
        assert_eq!(config.friction_step_ms, 100);

        let config = from_single("RATE_LIMIT_BLACKLIST_SECS", "2592000").unwrap();
        assert_eq!(config.blacklist_secs, MAX_DURATION_SECS);
    }
}
