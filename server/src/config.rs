//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// `MongoDB` connection URI
    pub mongodb_uri: String,

    /// Redis connection URL
    pub redis_url: String,

    /// Redis password (optional; overrides any password in the URL)
    pub redis_password: Option<String>,

    /// Redis database number (optional)
    pub redis_db: Option<u8>,

    /// Circuit breaker: database failure threshold (default: 5)
    pub db_breaker_threshold: u32,

    /// Circuit breaker: database reset timeout in seconds (default: 60)
    pub db_breaker_reset_secs: u64,

    /// Circuit breaker: cache failure threshold (default: 2)
    pub cache_breaker_threshold: u32,

    /// Circuit breaker: cache reset timeout in seconds (default: 10)
    pub cache_breaker_reset_secs: u64,

    /// Answer batcher: flush when the buffer reaches this size (default: 100)
    pub batcher_batch_size: usize,

    /// Answer batcher: flush interval in milliseconds (default: 1000)
    pub batcher_flush_interval_ms: u64,

    /// Answer batcher: insert retries per batch (default: 3)
    pub batcher_max_retries: u32,

    /// Answer batcher: base retry delay in milliseconds (default: 100)
    pub batcher_retry_base_delay_ms: u64,

    /// Recovery worker: check interval in seconds (default: 30)
    pub recovery_check_interval_secs: u64,

    /// Recovery worker: pending writes applied per batch (default: 10)
    pub recovery_batch_size: usize,

    /// Cache fallback: sweep interval for expired in-memory entries in
    /// seconds (default: 60)
    pub cache_sweep_interval_secs: u64,

    /// Cache fallback: minimum seconds between health probes (default: 30)
    pub cache_probe_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            mongodb_uri: env::var("MONGODB_URI").context("MONGODB_URI must be set")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            redis_password: env::var("REDIS_PASSWORD").ok(),
            redis_db: env::var("REDIS_DB").ok().and_then(|v| v.parse().ok()),
            db_breaker_threshold: env::var("DB_BREAKER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            db_breaker_reset_secs: env::var("DB_BREAKER_RESET_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            cache_breaker_threshold: env::var("CACHE_BREAKER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            cache_breaker_reset_secs: env::var("CACHE_BREAKER_RESET_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            batcher_batch_size: env::var("BATCHER_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            batcher_flush_interval_ms: env::var("BATCHER_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            batcher_max_retries: env::var("BATCHER_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            batcher_retry_base_delay_ms: env::var("BATCHER_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            recovery_check_interval_secs: env::var("RECOVERY_CHECK_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            recovery_batch_size: env::var("RECOVERY_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            cache_sweep_interval_secs: env::var("CACHE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            cache_probe_interval_secs: env::var("CACHE_PROBE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }

    /// Batcher flush interval as a [`Duration`].
    pub const fn batcher_flush_interval(&self) -> Duration {
        Duration::from_millis(self.batcher_flush_interval_ms)
    }

    /// Recovery worker check interval as a [`Duration`].
    pub const fn recovery_check_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_check_interval_secs)
    }

    /// Create a default configuration for testing.
    ///
    /// Uses Docker test containers:
    /// - `MongoDB`: `docker run -d --name quizdeck-test-mongo -p 27018:27017 mongo:7`
    /// - Redis: `docker run -d --name quizdeck-test-redis -e ALLOW_EMPTY_PASSWORD=yes -p 6380:6379 bitnami/redis:latest`
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            mongodb_uri: "mongodb://localhost:27018/quizdeck-test".into(),
            redis_url: "redis://localhost:6380".into(),
            redis_password: None,
            redis_db: None,
            db_breaker_threshold: 5,
            db_breaker_reset_secs: 60,
            cache_breaker_threshold: 2,
            cache_breaker_reset_secs: 10,
            batcher_batch_size: 100,
            batcher_flush_interval_ms: 1000,
            batcher_max_retries: 3,
            batcher_retry_base_delay_ms: 100,
            recovery_check_interval_secs: 30,
            recovery_batch_size: 10,
            cache_sweep_interval_secs: 60,
            cache_probe_interval_secs: 30,
        }
    }
}
