//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use lock::RetryPolicy;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres connection string; unset runs on in-memory
///   storage and locks (single instance only)
/// - `LOCK_MAX_ATTEMPTS`, `LOCK_BACKOFF_MS`, `LOCK_WAIT_MS_PER_TRY`,
///   `LOCK_LEASE_MS`: product lock retry policy (50 / 50 / 500 / 5000)
/// - `RECONCILIATION_INTERVAL_MINUTES`: payment reconciliation period (5)
/// - `PAYMENT_GATEWAY_URL`: payment provider base URL; unset uses an
///   in-memory gateway that approves everything
/// - `PAYMENT_GATEWAY_SECRET_KEY`: provider secret key (default: empty)
/// - `REQUEST_TIMEOUT_MS`: deadline for waiting on a product lock (30000)
///
/// Values that fail to parse fall back to their defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub lock_max_attempts: u32,
    pub lock_backoff_ms: u64,
    pub lock_wait_ms_per_try: u64,
    pub lock_lease_ms: u64,
    pub reconciliation_interval_minutes: u64,
    pub payment_gateway_url: Option<String>,
    pub payment_gateway_secret_key: String,
    pub request_timeout_ms: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |name: &str, default| parse_or(lookup(name), default);

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            lock_max_attempts: parse_or(lookup("LOCK_MAX_ATTEMPTS"), defaults.lock_max_attempts),
            lock_backoff_ms: number("LOCK_BACKOFF_MS", defaults.lock_backoff_ms),
            lock_wait_ms_per_try: number("LOCK_WAIT_MS_PER_TRY", defaults.lock_wait_ms_per_try),
            lock_lease_ms: number("LOCK_LEASE_MS", defaults.lock_lease_ms),
            reconciliation_interval_minutes: number(
                "RECONCILIATION_INTERVAL_MINUTES",
                defaults.reconciliation_interval_minutes,
            ),
            payment_gateway_url: lookup("PAYMENT_GATEWAY_URL").filter(|url| !url.trim().is_empty()),
            payment_gateway_secret_key: lookup("PAYMENT_GATEWAY_SECRET_KEY").unwrap_or_default(),
            request_timeout_ms: number("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The product lock retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lock_max_attempts.max(1),
            Duration::from_millis(self.lock_backoff_ms),
            Duration::from_millis(self.lock_wait_ms_per_try),
            Duration::from_millis(self.lock_lease_ms),
        )
    }

    pub fn reconciliation_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation_interval_minutes.max(1) * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            lock_max_attempts: 50,
            lock_backoff_ms: 50,
            lock_wait_ms_per_try: 500,
            lock_lease_ms: 5000,
            reconciliation_interval_minutes: 5,
            payment_gateway_url: None,
            payment_gateway_secret_key: String::new(),
            request_timeout_ms: 30_000,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
