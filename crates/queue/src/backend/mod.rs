//! Queue transports.
//!
//! Every transport implements [`QueueBackend`]. The manager only talks to
//! this trait, so switching between the in-process, relational, Redis and
//! STOMP adapters is a configuration change.

mod database;
mod in_process;
mod redis;
pub mod stomp;

pub use database::DatabaseBackend;
pub use in_process::InProcessBackend;
pub use redis::RedisBackend;
pub use stomp::StompBackend;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Identifier assigned to a job when it is enqueued.
pub type JobId = String;

/// A job handed out by [`QueueBackend::poll`].
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Job id, stable across retries.
    pub id: JobId,
    /// Logical queue the job came from.
    pub queue: String,
    /// Handler input.
    pub payload: Value,
    /// Attempts including the current one.
    pub attempts: u32,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Transport token needed to ack or nack this delivery.
    pub receipt: Option<String>,
}

impl Job {
    /// Deserialize the payload into a typed job.
    pub fn decode<T: DeserializeOwned>(&self) -> AppResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            AppError::InvalidPayload(format!("job {} on {}: {e}", self.id, self.queue))
        })
    }
}

/// Negative acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nack {
    /// Make the job available again after `delay`.
    Requeue {
        /// Time before the next attempt.
        delay: Duration,
    },
    /// Make the job available again after `delay` without counting the
    /// attempt that was just handed out.
    Defer {
        /// Time before the job is handed out again.
        delay: Duration,
    },
    /// Drop the job. The manager has already dead-lettered it.
    Discard,
}

/// A job transport.
///
/// `poll` hands a job to exactly one caller until it is acked, nacked or its
/// claim goes stale. Transport failures come back as errors and never panic.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Store a job and return its id.
    async fn enqueue(&self, queue: &str, payload: Value) -> AppResult<JobId>;

    /// Claim the next available job of a queue.
    async fn poll(&self, queue: &str) -> AppResult<Option<Job>>;

    /// Remove a finished job.
    async fn ack(&self, job: &Job) -> AppResult<()>;

    /// Give a job back or drop it.
    async fn nack(&self, job: &Job, nack: Nack) -> AppResult<()>;

    /// Release claims taken more than `older_than` ago.
    async fn reclaim_stale(&self, _older_than: Duration) -> AppResult<u64> {
        Ok(0)
    }

    /// Jobs waiting in a queue, if the transport can tell.
    async fn depth(&self, _queue: &str) -> AppResult<Option<u64>> {
        Ok(None)
    }
}

/// `now + delay`, saturating.
pub(crate) fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `now - age`, saturating.
pub(crate) fn older_than(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    fn job(payload: Value) -> Job {
        Job {
            id: "job1".to_string(),
            queue: "notification".to_string(),
            payload,
            attempts: 1,
            enqueued_at: Utc::now(),
            receipt: None,
        }
    }

    #[test]
    fn test_decode_payload() {
        let ping: Ping = job(serde_json::json!({ "n": 3 })).decode().unwrap();
        assert_eq!(ping, Ping { n: 3 });
    }

    #[test]
    fn test_decode_mismatch_is_invalid_payload() {
        let err = job(serde_json::json!("nope")).decode::<Ping>().unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(msg) if msg.contains("job1")));
    }
}
