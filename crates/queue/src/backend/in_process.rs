//! Synchronous transport: `enqueue` runs the handler before returning.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{AppError, AppResult, DeliveryOutcome, IdGenerator};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Job, JobId, Nack, QueueBackend};
use crate::registry::HandlerRegistry;

/// Runs jobs inline. Nothing is stored, so `poll` never returns work.
///
/// Useful for tests and single-process deployments without a worker.
pub struct InProcessBackend {
    registry: Arc<HandlerRegistry>,
    id_gen: IdGenerator,
}

impl InProcessBackend {
    /// Create a backend dispatching through `registry`.
    #[must_use]
    pub const fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl QueueBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in_process"
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> AppResult<JobId> {
        let handler = self.registry.resolve(queue)?;
        let job = Job {
            id: self.id_gen.generate(),
            queue: queue.to_string(),
            payload,
            attempts: 1,
            enqueued_at: Utc::now(),
            receipt: None,
        };

        match handler.handle(&job).await {
            DeliveryOutcome::Delivered => {
                debug!(job_id = %job.id, queue = %queue, "Job handled inline");
                Ok(job.id)
            }
            outcome => {
                warn!(job_id = %job.id, queue = %queue, outcome = %outcome, "Inline job failed");
                Err(AppError::Queue(format!(
                    "job {} on {queue} failed: {outcome}",
                    job.id
                )))
            }
        }
    }

    async fn poll(&self, _queue: &str) -> AppResult<Option<Job>> {
        Ok(None)
    }

    async fn ack(&self, _job: &Job) -> AppResult<()> {
        Ok(())
    }

    async fn nack(&self, _job: &Job, _nack: Nack) -> AppResult<()> {
        Ok(())
    }
}
