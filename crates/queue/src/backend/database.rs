//! Relational table transport.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{AppResult, IdGenerator};
use herald_db::{entities::queue_item, repositories::QueueItemRepository};
use serde_json::Value;
use tracing::{debug, warn};

use super::{Job, JobId, Nack, QueueBackend, due_after, older_than};

/// Jobs stored as `queue_item` rows and claimed with an atomic update.
#[derive(Clone)]
pub struct DatabaseBackend {
    items: QueueItemRepository,
    id_gen: IdGenerator,
}

impl DatabaseBackend {
    /// Create a backend over the queue item table.
    #[must_use]
    pub const fn new(items: QueueItemRepository) -> Self {
        Self {
            items,
            id_gen: IdGenerator::new(),
        }
    }

    fn to_job(item: queue_item::Model) -> Job {
        let payload = serde_json::from_str(&item.payload).unwrap_or_else(|e| {
            warn!(job_id = %item.id, error = %e, "Queue item payload is not JSON");
            Value::String(item.payload.clone())
        });

        Job {
            receipt: Some(item.id.clone()),
            id: item.id,
            queue: item.queue_name,
            payload,
            attempts: u32::try_from(item.attempts).unwrap_or(0),
            enqueued_at: item.created_at.with_timezone(&Utc),
        }
    }
}

#[async_trait]
impl QueueBackend for DatabaseBackend {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn enqueue(&self, queue: &str, payload: Value) -> AppResult<JobId> {
        let id = self.id_gen.generate();
        let item = self
            .items
            .push(id, queue, payload.to_string(), Utc::now())
            .await?;

        debug!(job_id = %item.id, queue = %queue, "Queued job");
        Ok(item.id)
    }

    async fn poll(&self, queue: &str) -> AppResult<Option<Job>> {
        Ok(self
            .items
            .claim_next(queue, Utc::now())
            .await?
            .map(Self::to_job))
    }

    async fn ack(&self, job: &Job) -> AppResult<()> {
        if !self.items.delete(&job.id).await? {
            debug!(job_id = %job.id, "Acked job was already removed");
        }
        Ok(())
    }

    async fn nack(&self, job: &Job, nack: Nack) -> AppResult<()> {
        match nack {
            Nack::Requeue { delay } => {
                self.items
                    .release(&job.id, due_after(Utc::now(), delay))
                    .await?;
            }
            Nack::Defer { delay } => {
                self.items
                    .defer(&job.id, due_after(Utc::now(), delay))
                    .await?;
            }
            Nack::Discard => {
                self.items.delete(&job.id).await?;
            }
        }
        Ok(())
    }

    async fn reclaim_stale(&self, age: Duration) -> AppResult<u64> {
        self.items
            .reclaim_stale(older_than(Utc::now(), age))
            .await
    }

    async fn depth(&self, queue: &str) -> AppResult<Option<u64>> {
        Ok(Some(self.items.count_by_queue(queue).await?))
    }
}
