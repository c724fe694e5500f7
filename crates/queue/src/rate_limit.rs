//! Outbound rate limiting per remote host.
//!
//! Keeps a burst of deliveries from hammering one remote server. A host
//! that uses up its budget in a window is put in cooldown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use herald_common::FederationConfig;
use tokio::sync::RwLock;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum deliveries per window.
    pub max_requests: u32,
    /// Time window duration.
    pub window: Duration,
    /// Cooldown period after hitting the limit.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 300,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

impl From<&FederationConfig> for RateLimitConfig {
    fn from(config: &FederationConfig) -> Self {
        Self {
            max_requests: config.host_max_requests,
            window: Duration::from_secs(config.host_window_secs),
            cooldown: Duration::from_secs(config.host_cooldown_secs),
        }
    }
}

/// Rate limit state for a single host.
#[derive(Debug, Clone)]
struct HostState {
    /// Deliveries in the current window.
    count: u32,
    /// Window start time.
    window_start: Instant,
    /// Cooldown end time (if in cooldown).
    cooldown_until: Option<Instant>,
}

impl HostState {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            cooldown_until: None,
        }
    }
}

/// Rate limit check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Delivery may proceed.
    Allowed,
    /// Host is in cooldown.
    Cooldown {
        /// Time until the cooldown ends.
        retry_after: Duration,
    },
}

/// Per-host rate limiter shared by all delivery workers of a process.
#[derive(Clone)]
pub struct InstanceRateLimiter {
    config: RateLimitConfig,
    states: Arc<RwLock<HashMap<String, HostState>>>,
}

impl InstanceRateLimiter {
    /// Create a new rate limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Count a delivery to `host` if its budget allows it.
    pub async fn check(&self, host: &str) -> RateLimitResult {
        let mut states = self.states.write().await;
        let now = Instant::now();

        let state = states
            .entry(host.to_string())
            .or_insert_with(|| HostState::new(now));

        if let Some(cooldown_until) = state.cooldown_until {
            if now < cooldown_until {
                return RateLimitResult::Cooldown {
                    retry_after: cooldown_until.duration_since(now),
                };
            }
            // Cooldown expired, reset state
            state.cooldown_until = None;
            state.count = 0;
            state.window_start = now;
        }

        if now.duration_since(state.window_start) >= self.config.window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.config.max_requests {
            state.cooldown_until = Some(now + self.config.cooldown);
            return RateLimitResult::Cooldown {
                retry_after: self.config.cooldown,
            };
        }

        state.count += 1;
        RateLimitResult::Allowed
    }

    /// Drop hosts whose window and cooldown have both lapsed.
    pub async fn cleanup(&self) {
        let mut states = self.states.write().await;
        let now = Instant::now();
        let window = self.config.window;

        states.retain(|_, state| {
            state.cooldown_until.is_some_and(|until| now < until)
                || now.duration_since(state.window_start) < window * 2
        });
    }
}
