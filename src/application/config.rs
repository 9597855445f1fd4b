//! Gatekeeper configuration.
//!
//! Built with `GatekeeperConfig::builder()` or loaded from `GATEKEEPER_*`
//! environment variables. Validation happens once in `build`, so a
//! `GatekeeperConfig` value is always usable.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::application::audit::{AuditConfig, AuditConfigError};
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::domain::exemption::ExemptPaths;
use crate::domain::policy::{FailMode, FailurePolicy, LimitPolicy, PolicyError};

pub const ENV_WINDOW_SECS: &str = "GATEKEEPER_WINDOW_SECS";
pub const ENV_THRESHOLD: &str = "GATEKEEPER_THRESHOLD";
pub const ENV_EXEMPT_PREFIXES: &str = "GATEKEEPER_EXEMPT_PREFIXES";
pub const ENV_EXEMPT_PATHS: &str = "GATEKEEPER_EXEMPT_PATHS";
pub const ENV_RESET_PATH: &str = "GATEKEEPER_RESET_PATH";
pub const ENV_STORE_TIMEOUT_MS: &str = "GATEKEEPER_STORE_TIMEOUT_MS";
pub const ENV_BAN_SECS: &str = "GATEKEEPER_BAN_SECS";
pub const ENV_TRUST_FORWARDED_FOR: &str = "GATEKEEPER_TRUST_FORWARDED_FOR";
pub const ENV_AUDIT_QUEUE: &str = "GATEKEEPER_AUDIT_QUEUE";
pub const ENV_BAN_CHECK_FAIL: &str = "GATEKEEPER_BAN_CHECK_FAIL";
pub const ENV_COUNTER_FAIL: &str = "GATEKEEPER_COUNTER_FAIL";

/// Default prefix exempt from the gate.
pub const DEFAULT_EXEMPT_PREFIX: &str = "/dashboard";

/// Default path of the reset route.
pub const DEFAULT_RESET_PATH: &str = "/reset-redis";

/// Error returned when configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Threshold, window or ban duration is invalid
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Audit queue settings are invalid
    #[error(transparent)]
    Audit(#[from] AuditConfigError),
    /// Store timeout must be greater than zero
    #[error("store timeout must be greater than 0")]
    ZeroTimeout,
    /// Circuit breaker must tolerate at least one failure
    #[error("circuit breaker failure threshold must be greater than 0")]
    ZeroFailureThreshold,
    /// Reset path must be an absolute request path
    #[error("reset path `{0}` must start with `/`")]
    InvalidResetPath(String),
    /// An environment variable could not be parsed
    #[error("invalid value `{value}` for {name}: {reason}")]
    InvalidVar {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Validated gatekeeper configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatekeeperConfig {
    policy: LimitPolicy,
    exemptions: ExemptPaths,
    reset_path: String,
    store_timeout: Duration,
    failure: FailurePolicy,
    trust_forwarded_for: bool,
    audit: AuditConfig,
    circuit_breaker: CircuitBreakerConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        let mut exemptions = ExemptPaths::new();
        exemptions.add_prefix(DEFAULT_EXEMPT_PREFIX);
        exemptions.add_exact(DEFAULT_RESET_PATH);
        Self {
            policy: LimitPolicy::default(),
            exemptions,
            reset_path: DEFAULT_RESET_PATH.to_string(),
            store_timeout: Duration::from_secs(2),
            failure: FailurePolicy::default(),
            trust_forwarded_for: false,
            audit: AuditConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl GatekeeperConfig {
    /// Create a builder starting from the defaults.
    pub fn builder() -> GatekeeperConfigBuilder {
        GatekeeperConfigBuilder::default()
    }

    /// Load configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is malformed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    /// Returns `ConfigError` if a variable is malformed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_WINDOW_SECS)? {
            builder = builder.with_window(Duration::from_secs(secs));
        }
        if let Some(threshold) = parse_var::<u64>(&lookup, ENV_THRESHOLD)? {
            builder = builder.with_threshold(threshold);
        }
        if let Some(list) = lookup(ENV_EXEMPT_PREFIXES) {
            builder = builder.with_exempt_prefixes(split_list(&list));
        }
        if let Some(list) = lookup(ENV_EXEMPT_PATHS) {
            for path in split_list(&list) {
                builder = builder.with_exempt_path(path);
            }
        }
        if let Some(path) = lookup(ENV_RESET_PATH) {
            builder = builder.with_reset_path(path.trim());
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_STORE_TIMEOUT_MS)? {
            builder = builder.with_store_timeout(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_BAN_SECS)? {
            builder = builder.with_ban_duration(Duration::from_secs(secs));
        }
        if let Some(trust) = parse_bool(&lookup, ENV_TRUST_FORWARDED_FOR)? {
            builder = builder.with_trust_forwarded_for(trust);
        }
        if let Some(capacity) = parse_var::<usize>(&lookup, ENV_AUDIT_QUEUE)? {
            builder = builder.with_audit_queue_capacity(capacity);
        }

        let mut failure = FailurePolicy::default();
        if let Some(mode) = parse_var::<FailMode>(&lookup, ENV_BAN_CHECK_FAIL)? {
            failure.ban_check = mode;
        }
        if let Some(mode) = parse_var::<FailMode>(&lookup, ENV_COUNTER_FAIL)? {
            failure.counter = mode;
        }

        builder.with_failure_policy(failure).build()
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Exempt path rules, including the reset path.
    pub fn exemptions(&self) -> &ExemptPaths {
        &self.exemptions
    }

    pub fn reset_path(&self) -> &str {
        &self.reset_path
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    pub fn audit(&self) -> AuditConfig {
        self.audit
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        self.circuit_breaker
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidVar {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidVar {
            name,
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builder for constructing a `GatekeeperConfig`.
#[derive(Debug, Clone)]
pub struct GatekeeperConfigBuilder {
    threshold: u64,
    window: Duration,
    ban_duration: Option<Duration>,
    exempt_prefixes: Vec<String>,
    exempt_paths: Vec<String>,
    reset_path: String,
    store_timeout: Duration,
    failure: FailurePolicy,
    trust_forwarded_for: bool,
    audit_queue_capacity: usize,
    circuit_breaker: CircuitBreakerConfig,
}

impl Default for GatekeeperConfigBuilder {
    fn default() -> Self {
        let defaults = GatekeeperConfig::default();
        Self {
            threshold: defaults.policy.threshold(),
            window: defaults.policy.window(),
            ban_duration: None,
            exempt_prefixes: vec![DEFAULT_EXEMPT_PREFIX.to_string()],
            exempt_paths: Vec::new(),
            reset_path: defaults.reset_path,
            store_timeout: defaults.store_timeout,
            failure: defaults.failure,
            trust_forwarded_for: defaults.trust_forwarded_for,
            audit_queue_capacity: defaults.audit.queue_capacity,
            circuit_breaker: defaults.circuit_breaker,
        }
    }
}

impl GatekeeperConfigBuilder {
    /// Set the window length. Default: 60 seconds.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the number of requests admitted per window. Default: 100.
    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Add one exempt prefix to the current list.
    pub fn with_exempt_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.exempt_prefixes.push(prefix.into());
        self
    }

    /// Replace the exempt prefixes, dropping the `/dashboard` default.
    pub fn with_exempt_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exempt_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Exempt one exact path.
    pub fn with_exempt_path(mut self, path: impl Into<String>) -> Self {
        self.exempt_paths.push(path.into());
        self
    }

    /// Set the reset route path. It is always exempt.
    pub fn with_reset_path(mut self, path: impl Into<String>) -> Self {
        self.reset_path = path.into();
        self
    }

    /// Set the upper bound on every store call. Default: 2 seconds.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Make bans expire after `duration` instead of lasting until reset.
    pub fn with_ban_duration(mut self, duration: Duration) -> Self {
        self.ban_duration = Some(duration);
        self
    }

    pub fn with_failure_policy(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    /// Take the client address from the first `X-Forwarded-For` entry.
    ///
    /// Only enable this behind a proxy that overwrites the header.
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Set the audit queue capacity. Default: 1024.
    pub fn with_audit_queue_capacity(mut self, capacity: usize) -> Self {
        self.audit_queue_capacity = capacity;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn build(self) -> Result<GatekeeperConfig, ConfigError> {
        let mut policy = LimitPolicy::new(self.threshold, self.window)?;
        if let Some(duration) = self.ban_duration {
            policy = policy.with_ban_duration(duration)?;
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if !self.reset_path.starts_with('/') {
            return Err(ConfigError::InvalidResetPath(self.reset_path));
        }

        let audit = AuditConfig::new(self.audit_queue_capacity)?.with_write_timeout(self.store_timeout);

        let mut exemptions = ExemptPaths::new();
        for prefix in self.exempt_prefixes {
            exemptions.add_prefix(prefix);
        }
        for path in self.exempt_paths {
            exemptions.add_exact(path);
        }
        exemptions.add_exact(self.reset_path.clone());

        Ok(GatekeeperConfig {
            policy,
            exemptions,
            reset_path: self.reset_path,
            store_timeout: self.store_timeout,
            failure: self.failure,
            trust_forwarded_for: self.trust_forwarded_for,
            audit,
            circuit_breaker: self.circuit_breaker,
        })
    }
}
