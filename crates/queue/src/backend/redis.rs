//! Redis list transport.
//!
//! Keys per queue, all under the configured prefix:
//!
//! - `{prefix}:queue:{name}`: ready envelopes, LPUSH in, RPOPLPUSH out
//! - `{prefix}:processing:{name}`: envelopes held by a worker
//! - `{prefix}:claims:{name}`: sorted set of held envelopes scored by claim time
//! - `{prefix}:delayed:{name}`: sorted set of retries scored by due time

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::prelude::{
    Client, ClientLike, Config as FredConfig, Error as FredError, ListInterface,
    SortedSetsInterface,
};
use herald_common::{AppError, AppResult, IdGenerator, RedisConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Job, JobId, Nack, QueueBackend, due_after, older_than};

/// Serialized form of a job inside Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    id: String,
    queue: String,
    payload: Value,
    enqueued_at: DateTime<Utc>,
    /// Attempts already made.
    attempts: u32,
}

fn redis_err(e: FredError) -> AppError {
    AppError::Redis(e.to_string())
}

fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

/// Jobs stored in Redis lists.
///
/// A worker that dies after RPOPLPUSH but before recording its claim leaves
/// an envelope in the processing list without a score. `reclaim_stale`
/// adopts such envelopes so they are redelivered one claim timeout later.
pub struct RedisBackend {
    client: Client,
    prefix: String,
    queues: Vec<String>,
    id_gen: IdGenerator,
}

impl RedisBackend {
    /// Connect to Redis. `queues` are the queues swept by `reclaim_stale`.
    pub async fn connect(config: &RedisConfig, queues: Vec<String>) -> AppResult<Self> {
        let fred_config = FredConfig::from_url(&config.url)
            .map_err(|e| AppError::Config(format!("invalid redis url: {e}")))?;
        let client = Client::new(fred_config, None, None, None);
        client.init().await.map_err(redis_err)?;

        info!(prefix = %config.prefix, "Redis queue backend connected");
        Ok(Self::with_client(client, config.prefix.clone(), queues))
    }

    /// Wrap an already connected client.
    #[must_use]
    pub fn with_client(client: Client, prefix: String, queues: Vec<String>) -> Self {
        Self {
            client,
            prefix,
            queues,
            id_gen: IdGenerator::new(),
        }
    }

    fn key(&self, kind: &str, queue: &str) -> String {
        format!("{}:{kind}:{queue}", self.prefix)
    }

    /// Move delayed envelopes that are due onto the ready list.
    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> AppResult<()> {
        let delayed = self.key("delayed", queue);
        let due: Vec<String> = self
            .client
            .zrangebyscore(delayed.as_str(), "-inf", score(now), false, None)
            .await
            .map_err(redis_err)?;

        for raw in due {
            // Only the worker whose ZREM succeeds pushes the envelope.
            let removed: i64 = self
                .client
                .zrem(delayed.as_str(), raw.clone())
                .await
                .map_err(redis_err)?;
            if removed == 1 {
                let _: i64 = self
                    .client
                    .rpush(self.key("queue", queue), raw)
                    .await
                    .map_err(redis_err)?;
            }
        }
        Ok(())
    }

    /// Forget a held envelope.
    async fn release(&self, queue: &str, raw: &str) -> AppResult<()> {
        let _: i64 = self
            .client
            .lrem(self.key("processing", queue), 1, raw.to_string())
            .await
            .map_err(redis_err)?;
        let _: i64 = self
            .client
            .zrem(self.key("claims", queue), raw.to_string())
            .await
            .map_err(redis_err)?;
        Ok(())
    }

    fn receipt<'a>(&self, job: &'a Job) -> AppResult<&'a str> {
        job.receipt
            .as_deref()
            .ok_or_else(|| AppError::Queue(format!("job {} has no redis receipt", job.id)))
    }

    async fn reclaim_queue(&self, queue: &str, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let processing = self.key("processing", queue);
        let claims = self.key("claims", queue);

        let held: Vec<String> = self
            .client
            .lrange(processing.as_str(), 0, -1)
            .await
            .map_err(redis_err)?;
        for raw in held {
            let claimed: Option<f64> = self
                .client
                .zscore(claims.as_str(), raw.clone())
                .await
                .map_err(redis_err)?;
            if claimed.is_none() {
                debug!(queue = %queue, "Adopting unclaimed processing entry");
                let _: i64 = self
                    .client
                    .zadd(
                        claims.as_str(),
                        None,
                        None,
                        false,
                        false,
                        (score(Utc::now()), raw),
                    )
                    .await
                    .map_err(redis_err)?;
            }
        }

        let stale: Vec<String> = self
            .client
            .zrangebyscore(claims.as_str(), "-inf", score(cutoff), false, None)
            .await
            .map_err(redis_err)?;

        let mut reclaimed = 0;
        for raw in stale {
            let removed: i64 = self
                .client
                .zrem(claims.as_str(), raw.clone())
                .await
                .map_err(redis_err)?;
            if removed != 1 {
                continue;
            }
            // An envelope already gone from the processing list was acked.
            let held: i64 = self
                .client
                .lrem(processing.as_str(), 1, raw.clone())
                .await
                .map_err(redis_err)?;
            if held != 1 {
                debug!(queue = %queue, "Dropping claim score of an acked envelope");
                continue;
            }
            let _: i64 = self
                .client
                .rpush(self.key("queue", queue), raw)
                .await
                .map_err(redis_err)?;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> AppResult<JobId> {
        let envelope = Envelope {
            id: self.id_gen.generate(),
            queue: queue.to_string(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        };
        let raw = serde_json::to_string(&envelope)?;

        let _: i64 = self
            .client
            .lpush(self.key("queue", queue), raw)
            .await
            .map_err(redis_err)?;

        debug!(job_id = %envelope.id, queue = %queue, "Queued job");
        Ok(envelope.id)
    }

    async fn poll(&self, queue: &str) -> AppResult<Option<Job>> {
        let now = Utc::now();
        self.promote_due(queue, now).await?;

        let raw: Option<String> = self
            .client
            .rpoplpush(self.key("queue", queue), self.key("processing", queue))
            .await
            .map_err(redis_err)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let _: i64 = self
            .client
            .zadd(
                self.key("claims", queue),
                None,
                None,
                false,
                false,
                (score(now), raw.clone()),
            )
            .await
            .map_err(redis_err)?;

        match serde_json::from_str::<Envelope>(&raw) {
            Ok(envelope) => Ok(Some(Job {
                id: envelope.id,
                queue: queue.to_string(),
                payload: envelope.payload,
                attempts: envelope.attempts.saturating_add(1),
                enqueued_at: envelope.enqueued_at,
                receipt: Some(raw),
            })),
            Err(e) => {
                warn!(queue = %queue, error = %e, "Unreadable envelope, handing raw text to the handler");
                Ok(Some(Job {
                    id: self.id_gen.generate(),
                    queue: queue.to_string(),
                    payload: Value::String(raw.clone()),
                    attempts: 1,
                    enqueued_at: now,
                    receipt: Some(raw),
                }))
            }
        }
    }

    async fn ack(&self, job: &Job) -> AppResult<()> {
        let raw = self.receipt(job)?;
        self.release(&job.queue, raw).await
    }

    async fn nack(&self, job: &Job, nack: Nack) -> AppResult<()> {
        let raw = self.receipt(job)?;

        let next_attempt = match nack {
            Nack::Requeue { delay } => Some((delay, job.attempts)),
            Nack::Defer { delay } => Some((delay, job.attempts.saturating_sub(1))),
            Nack::Discard => None,
        };

        if let Some((delay, attempts)) = next_attempt {
            let envelope = Envelope {
                id: job.id.clone(),
                queue: job.queue.clone(),
                payload: job.payload.clone(),
                enqueued_at: job.enqueued_at,
                attempts,
            };
            let next = serde_json::to_string(&envelope)?;

            if delay.is_zero() {
                let _: i64 = self
                    .client
                    .lpush(self.key("queue", &job.queue), next)
                    .await
                    .map_err(redis_err)?;
            } else {
                let due = due_after(Utc::now(), delay);
                let _: i64 = self
                    .client
                    .zadd(
                        self.key("delayed", &job.queue),
                        None,
                        None,
                        false,
                        false,
                        (score(due), next),
                    )
                    .await
                    .map_err(redis_err)?;
            }
        }

        self.release(&job.queue, raw).await
    }

    async fn reclaim_stale(&self, age: Duration) -> AppResult<u64> {
        let cutoff = older_than(Utc::now(), age);
        let mut total = 0;
        for queue in &self.queues {
            total += self.reclaim_queue(queue, cutoff).await?;
        }
        Ok(total)
    }

    async fn depth(&self, queue: &str) -> AppResult<Option<u64>> {
        let ready: u64 = self
            .client
            .llen(self.key("queue", queue))
            .await
            .map_err(redis_err)?;
        let delayed: u64 = self
            .client
            .zcard(self.key("delayed", queue))
            .await
            .map_err(redis_err)?;
        Ok(Some(ready + delayed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_attempts_default_shape() {
        let envelope = Envelope {
            id: "01j".to_string(),
            queue: "federation".to_string(),
            payload: serde_json::json!({ "inbox": "https://remote.example/inbox" }),
            enqueued_at: Utc::now(),
            attempts: 2,
        };
        let raw = serde_json::to_value(&envelope).unwrap_or_default();

        assert_eq!(raw["attempts"], 2);
        assert_eq!(raw["payload"]["inbox"], "https://remote.example/inbox");
    }

    #[test]
    fn test_score_is_millis() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default();
        assert!((score(at) - 1_700_000_000_000.0).abs() < f64::EPSILON);
    }
}
