//! Queue manager: polls the backend, runs handlers and acts on outcomes.

use std::sync::Arc;
use std::time::Duration;

use herald_common::{AppError, AppResult, DeliveryOutcome, IdGenerator, QueueConfig};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::backend::{Job, JobId, Nack, QueueBackend};
use crate::dead_letter::{DeadLetterEntry, DeadLetterStore};
use crate::registry::HandlerRegistry;
use crate::retry::RetryConfig;

/// Polling and retry settings.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Queues served, in polling order.
    pub queues: Vec<String>,
    /// Sleep after a pass that found no work, and after transport errors.
    pub poll_interval: Duration,
    /// Claims older than this are handed out again.
    pub claim_timeout: Duration,
    /// Backoff and attempt limit.
    pub retry: RetryConfig,
}

impl From<&QueueConfig> for QueueSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            queues: config.queues.clone(),
            poll_interval: config.poll_interval(),
            claim_timeout: config.claim_timeout(),
            retry: RetryConfig::from(config),
        }
    }
}

/// Ties a backend, the handler registry and the dead-letter store together.
pub struct QueueManager {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    dead_letters: Arc<dyn DeadLetterStore>,
    settings: QueueSettings,
    id_gen: IdGenerator,
}

impl QueueManager {
    /// Create a manager.
    #[must_use]
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<HandlerRegistry>,
        dead_letters: Arc<dyn DeadLetterStore>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            backend,
            registry,
            dead_letters,
            settings,
            id_gen: IdGenerator::new(),
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Name of the configured backend.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Check that every served queue has a handler.
    pub fn validate(&self) -> AppResult<()> {
        self.registry.validate(&self.settings.queues)
    }

    /// Queue a job on a registered queue.
    pub async fn enqueue(&self, queue: &str, payload: Value) -> AppResult<JobId> {
        self.registry.resolve(queue)?;
        self.backend.enqueue(queue, payload).await
    }

    /// Serialize and queue a typed job.
    pub async fn enqueue_job<T: Serialize + Sync>(&self, queue: &str, job: &T) -> AppResult<JobId> {
        self.enqueue(queue, serde_json::to_value(job)?).await
    }

    /// One pass over all served queues, at most one job each.
    ///
    /// Returns how many jobs were handled. A failed poll aborts the pass; a
    /// job that cannot be settled is logged and left to the claim timeout.
    pub async fn run_once(&self) -> AppResult<usize> {
        let mut processed = 0;
        for queue in &self.settings.queues {
            if let Some(job) = self.backend.poll(queue).await? {
                let job_id = job.id.clone();
                if let Err(e) = self.process(job).await {
                    error!(job_id = %job_id, queue = %queue, error = %e, "Failed to settle job");
                }
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Poll until `shutdown` turns true or its sender goes away.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            backend = self.backend.name(),
            queues = ?self.settings.queues,
            "Queue worker started"
        );

        match self.reclaim_stale().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Released stale claims"),
            Err(e) => warn!(error = %e, "Failed to release stale claims"),
        }

        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(0) => true,
                Ok(count) => {
                    debug!(count, "Processed jobs");
                    false
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff = ?self.settings.poll_interval,
                        "Queue pass failed, backing off"
                    );
                    true
                }
            };

            if idle {
                tokio::select! {
                    () = tokio::time::sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Queue worker stopped");
    }

    async fn process(&self, job: Job) -> AppResult<()> {
        let outcome = match self.registry.resolve(&job.queue) {
            Ok(handler) => handler.handle(&job).await,
            Err(e) => DeliveryOutcome::permanent(e.to_string()),
        };
        self.settle(&job, outcome).await
    }

    /// Ack, requeue or dead-letter a job according to its outcome.
    async fn settle(&self, job: &Job, outcome: DeliveryOutcome) -> AppResult<()> {
        match outcome {
            DeliveryOutcome::Delivered => {
                debug!(job_id = %job.id, queue = %job.queue, attempt = job.attempts, "Job done");
                self.backend.ack(job).await
            }
            DeliveryOutcome::Retryable {
                reason,
                retry_after,
            } => {
                if self.settings.retry.should_retry(job.attempts) {
                    let delay = retry_after
                        .unwrap_or_else(|| self.settings.retry.delay_after_attempt(job.attempts));
                    warn!(
                        job_id = %job.id,
                        queue = %job.queue,
                        attempt = job.attempts,
                        ?delay,
                        reason = %reason,
                        "Job failed, will retry"
                    );
                    self.backend.nack(job, Nack::Requeue { delay }).await
                } else {
                    error!(
                        job_id = %job.id,
                        queue = %job.queue,
                        attempts = job.attempts,
                        reason = %reason,
                        "Job exhausted its attempts"
                    );
                    self.dead_letter(job, reason).await
                }
            }
            DeliveryOutcome::Deferred { retry_after } => {
                debug!(
                    job_id = %job.id,
                    queue = %job.queue,
                    delay = ?retry_after,
                    "Job deferred"
                );
                self.backend
                    .nack(job, Nack::Defer { delay: retry_after })
                    .await
            }
            DeliveryOutcome::Permanent { reason } => {
                error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    reason = %reason,
                    payload = %job.payload,
                    "Job failed permanently"
                );
                self.dead_letter(job, reason).await
            }
        }
    }

    async fn dead_letter(&self, job: &Job, reason: String) -> AppResult<()> {
        let entry = DeadLetterEntry::new(self.id_gen.generate(), job, reason);
        self.dead_letters.store(entry).await?;
        self.backend.nack(job, Nack::Discard).await
    }

    /// Put a dead letter back on its queue with a fresh attempt count.
    pub async fn replay_dead_letter(&self, id: &str) -> AppResult<JobId> {
        let entry = self
            .dead_letters
            .find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("dead letter {id}")))?;

        let job_id = self.enqueue(&entry.queue, entry.payload).await?;
        self.dead_letters.remove(id).await?;

        info!(dead_letter_id = %id, job_id = %job_id, queue = %entry.queue, "Replayed dead letter");
        Ok(job_id)
    }

    /// Newest dead letters first.
    pub async fn dead_letters(
        &self,
        queue: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<DeadLetterEntry>> {
        self.dead_letters.list(queue, limit).await
    }

    /// Number of dead letters.
    pub async fn dead_letter_count(&self) -> AppResult<u64> {
        self.dead_letters.count().await
    }

    /// Waiting jobs per served queue.
    pub async fn depths(&self) -> AppResult<Vec<(String, Option<u64>)>> {
        let mut depths = Vec::with_capacity(self.settings.queues.len());
        for queue in &self.settings.queues {
            depths.push((queue.clone(), self.backend.depth(queue).await?));
        }
        Ok(depths)
    }

    /// Release claims older than the claim timeout.
    pub async fn reclaim_stale(&self) -> AppResult<u64> {
        self.backend.reclaim_stale(self.settings.claim_timeout).await
    }
}
