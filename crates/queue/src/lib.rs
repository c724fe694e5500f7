//! Job queue for herald.
//!
//! Moves fan-out results to their handlers through a pluggable backend:
//!
//! - **Backends**: in-process, relational table, Redis lists, STOMP broker
//! - **Manager**: polling loop, retry with backoff, dead letters
//! - **Registry**: queue name to handler mapping
//! - **Workers**: local notification rows and signed remote delivery
//! - **Rate limiting**: per-host outbound budgets
//! - **Scheduler**: stale-claim recovery and receipt pruning

pub mod backend;
pub mod dead_letter;
pub mod dispatch;
pub mod jobs;
pub mod manager;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod workers;

pub use backend::{
    DatabaseBackend, InProcessBackend, Job, JobId, Nack, QueueBackend, RedisBackend, StompBackend,
};
pub use dead_letter::{DeadLetterEntry, DeadLetterStore};
pub use dispatch::QueueDispatch;
pub use jobs::*;
pub use manager::{QueueManager, QueueSettings};
pub use rate_limit::{InstanceRateLimiter, RateLimitConfig, RateLimitResult};
pub use registry::{HandlerRegistry, JobHandler};
pub use retry::RetryConfig;
pub use scheduler::{MaintenanceExecutor, QueueMaintenance, SchedulerConfig, run_scheduler};
pub use workers::*;
