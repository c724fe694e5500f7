//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{AppError, AppResult};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Redis configuration (required by the `redis` backend).
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// STOMP broker configuration (required by the `stomp` backend).
    #[serde(default)]
    pub stomp: Option<StompConfig>,
    /// Federation configuration.
    pub federation: FederationConfig,
    /// Fan-out policy.
    #[serde(default)]
    pub fanout: FanOutConfig,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Which transport carries queued jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendKind {
    /// Run handlers synchronously inside `enqueue`.
    InProcess,
    /// Relational table polled by workers.
    Database,
    /// Redis lists.
    Redis,
    /// STOMP message broker.
    Stomp,
}

/// Queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Selected backend.
    #[serde(default = "default_backend")]
    pub backend: QueueBackendKind,
    /// Logical queues this deployment serves.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    /// Sleep between empty polls, in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Attempts before a retryable job is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay, in seconds.
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// Upper bound on retry delay, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Claims older than this are released for redelivery, in seconds.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: u64,
    /// Polling loops per process.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            queues: default_queues(),
            poll_interval_secs: default_poll_interval_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            claim_timeout_secs: default_claim_timeout_secs(),
            workers: default_workers(),
        }
    }
}

impl QueueConfig {
    /// Sleep between empty polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Claim timeout as a duration.
    #[must_use]
    pub const fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// STOMP broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StompConfig {
    /// Broker address (`host:port`).
    pub server: String,
    /// Login header.
    #[serde(default)]
    pub username: Option<String>,
    /// Passcode header.
    #[serde(default)]
    pub password: Option<String>,
    /// Virtual host sent in CONNECT.
    #[serde(default)]
    pub vhost: Option<String>,
    /// Prepended to every queue name to form the destination.
    #[serde(default = "default_stomp_prefix")]
    pub prefix: String,
    /// How long `poll` waits for a message, in milliseconds.
    #[serde(default = "default_stomp_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// Federation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Public URL of this instance.
    pub instance_url: String,
    /// Outbound User-Agent override.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Timeout for one inbox push, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum pushes per remote host in one window.
    #[serde(default = "default_host_max_requests")]
    pub host_max_requests: u32,
    /// Rate limit window, in seconds.
    #[serde(default = "default_host_window_secs")]
    pub host_window_secs: u64,
    /// Cooldown after a host exceeds its budget, in seconds.
    #[serde(default = "default_host_cooldown_secs")]
    pub host_cooldown_secs: u64,
}

/// Fan-out policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FanOutConfig {
    /// Notify the sender about their own activity.
    #[serde(default)]
    pub notify_self: bool,
    /// Days fan-out receipts are kept.
    #[serde(default = "default_receipt_retention_days")]
    pub receipt_retention_days: u32,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            notify_self: false,
            receipt_retention_days: default_receipt_retention_days(),
        }
    }
}

const fn default_max_connections() -> u32 {
    20
}

const fn default_min_connections() -> u32 {
    2
}

const fn default_backend() -> QueueBackendKind {
    QueueBackendKind::Database
}

fn default_queues() -> Vec<String> {
    vec!["notification".to_string(), "federation".to_string()]
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_secs() -> u64 {
    60
}

const fn default_max_backoff_secs() -> u64 {
    3600 * 24
}

const fn default_claim_timeout_secs() -> u64 {
    3600
}

const fn default_workers() -> usize {
    1
}

fn default_redis_prefix() -> String {
    "herald".to_string()
}

fn default_stomp_prefix() -> String {
    "herald.".to_string()
}

const fn default_stomp_poll_timeout_ms() -> u64 {
    500
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_host_max_requests() -> u32 {
    300
}

const fn default_host_window_secs() -> u64 {
    60
}

const fn default_host_cooldown_secs() -> u64 {
    120
}

const fn default_receipt_retention_days() -> u32 {
    30
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `HERALD_ENV`)
    /// 3. Environment variables with `HERALD__` prefix
    pub fn load() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("HERALD_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("HERALD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("HERALD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot start.
    pub fn validate(&self) -> AppResult<()> {
        match self.queue.backend {
            QueueBackendKind::Redis if self.redis.is_none() => {
                return Err(AppError::Config(
                    "queue.backend = redis requires a [redis] section".to_string(),
                ));
            }
            QueueBackendKind::Stomp if self.stomp.is_none() => {
                return Err(AppError::Config(
                    "queue.backend = stomp requires a [stomp] section".to_string(),
                ));
            }
            _ => {}
        }

        if self.queue.queues.is_empty() {
            return Err(AppError::Config("queue.queues must not be empty".to_string()));
        }
        if self.queue.max_attempts == 0 {
            return Err(AppError::Config("queue.max_attempts must be at least 1".to_string()));
        }
        if self.queue.workers == 0 {
            return Err(AppError::Config("queue.workers must be at least 1".to_string()));
        }

        Ok(())
    }
}
