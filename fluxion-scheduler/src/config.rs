//! Scheduler configuration
//!
//! Every setting has a default so a bare `cargo run` starts a single-process
//! engine backed by in-memory storage.

use fluxion_lua::SandboxLimits;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL; `None` selects the in-memory store and queue
    pub database_url: Option<String>,

    /// HTTP API bind address
    pub bind_addr: String,

    /// How long the consumer sleeps when the queue is empty
    pub poll_interval: Duration,

    /// Jobs executed concurrently by one consumer
    pub max_parallel_jobs: usize,

    /// Wall-clock limit of a script atom
    pub sandbox_timeout: Duration,

    /// Memory ceiling of a script atom, in bytes
    pub sandbox_memory_limit: usize,

    /// Webhook request timeout; `None` leaves it to the transport
    pub webhook_timeout: Option<Duration>,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Recognised variables:
    /// - DATABASE_URL (optional, in-memory when unset)
    /// - FLUXION_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - POLL_INTERVAL_MS (optional, default: 500)
    /// - MAX_PARALLEL_JOBS (optional, default: 8)
    /// - SANDBOX_TIMEOUT_MS (optional, default: 5000)
    /// - SANDBOX_MEMORY_LIMIT (optional, bytes, default: 64 MiB)
    /// - WEBHOOK_TIMEOUT_SECS (optional, default: 30, 0 disables)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let bind_addr = lookup("FLUXION_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let poll_interval = parse::<u64>(&lookup, "POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let max_parallel_jobs =
            parse::<usize>(&lookup, "MAX_PARALLEL_JOBS")?.unwrap_or(defaults.max_parallel_jobs);

        let sandbox_timeout = parse::<u64>(&lookup, "SANDBOX_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.sandbox_timeout);

        let sandbox_memory_limit = parse::<usize>(&lookup, "SANDBOX_MEMORY_LIMIT")?
            .unwrap_or(defaults.sandbox_memory_limit);

        let webhook_timeout = match parse::<u64>(&lookup, "WEBHOOK_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.webhook_timeout,
        };

        Ok(Self {
            database_url,
            bind_addr,
            poll_interval,
            max_parallel_jobs,
            sandbox_timeout,
            sandbox_memory_limit,
            webhook_timeout,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.sandbox_timeout.is_zero() {
            anyhow::bail!("sandbox_timeout must be greater than 0");
        }

        if self.sandbox_memory_limit < 1024 * 1024 {
            anyhow::bail!("sandbox_memory_limit must be at least 1 MiB");
        }

        if let Some(url) = &self.database_url
            && !url.starts_with("postgres://")
            && !url.starts_with("postgresql://")
        {
            anyhow::bail!("DATABASE_URL must be a postgres:// URL");
        }

        Ok(())
    }

    pub fn sandbox_limits(&self) -> SandboxLimits {
        SandboxLimits {
            timeout: self.sandbox_timeout,
            memory_limit: self.sandbox_memory_limit,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
            poll_interval: Duration::from_millis(500),
            max_parallel_jobs: 8,
            sandbox_timeout: Duration::from_secs(5),
            sandbox_memory_limit: 64 * 1024 * 1024,
            webhook_timeout: Some(Duration::from_secs(30)),
        }
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        None => Ok(None),
    }
}
