//! Jobs removed from retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_common::AppResult;
use herald_db::{entities::dead_letter, repositories::DeadLetterRepository};
use sea_orm::Set;
use serde_json::Value;

use crate::backend::Job;

/// A job that exhausted its attempts or failed permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterEntry {
    /// Dead letter id.
    pub id: String,
    /// Id the job had while queued.
    pub job_id: String,
    /// Queue the job belongs to.
    pub queue: String,
    /// Original payload.
    pub payload: Value,
    /// Attempts made.
    pub attempts: u32,
    /// Failure reason of the last attempt.
    pub last_error: String,
    /// When the job was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the job was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Build an entry for a failed job.
    pub fn new(id: String, job: &Job, error: impl Into<String>) -> Self {
        Self {
            id,
            job_id: job.id.clone(),
            queue: job.queue.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
            last_error: error.into(),
            enqueued_at: job.enqueued_at,
            failed_at: Utc::now(),
        }
    }
}

/// Where dead letters are kept.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persist an entry.
    async fn store(&self, entry: DeadLetterEntry) -> AppResult<()>;

    /// Look up an entry.
    async fn find(&self, id: &str) -> AppResult<Option<DeadLetterEntry>>;

    /// Newest entries first.
    async fn list(&self, queue: Option<&str>, limit: u64) -> AppResult<Vec<DeadLetterEntry>>;

    /// Delete an entry. Returns false if it did not exist.
    async fn remove(&self, id: &str) -> AppResult<bool>;

    /// Number of entries.
    async fn count(&self) -> AppResult<u64>;
}

impl From<dead_letter::Model> for DeadLetterEntry {
    fn from(model: dead_letter::Model) -> Self {
        let payload =
            serde_json::from_str(&model.payload).unwrap_or(Value::String(model.payload));
        Self {
            id: model.id,
            job_id: model.job_id,
            queue: model.queue_name,
            payload,
            attempts: u32::try_from(model.attempts).unwrap_or(0),
            last_error: model.last_error,
            enqueued_at: model.enqueued_at.with_timezone(&Utc),
            failed_at: model.failed_at.with_timezone(&Utc),
        }
    }
}

#[async_trait]
impl DeadLetterStore for DeadLetterRepository {
    async fn store(&self, entry: DeadLetterEntry) -> AppResult<()> {
        let model = dead_letter::ActiveModel {
            id: Set(entry.id),
            job_id: Set(entry.job_id),
            queue_name: Set(entry.queue),
            payload: Set(entry.payload.to_string()),
            attempts: Set(i32::try_from(entry.attempts).unwrap_or(i32::MAX)),
            last_error: Set(entry.last_error),
            enqueued_at: Set(entry.enqueued_at.into()),
            failed_at: Set(entry.failed_at.into()),
        };
        self.create(model).await?;
        Ok(())
    }

    async fn find(&self, id: &str) -> AppResult<Option<DeadLetterEntry>> {
        Ok(self.find_by_id(id).await?.map(DeadLetterEntry::from))
    }

    async fn list(&self, queue: Option<&str>, limit: u64) -> AppResult<Vec<DeadLetterEntry>> {
        Ok(Self::list(self, queue, limit)
            .await?
            .into_iter()
            .map(DeadLetterEntry::from)
            .collect())
    }

    async fn remove(&self, id: &str) -> AppResult<bool> {
        self.delete(id).await
    }

    async fn count(&self) -> AppResult<u64> {
        Self::count(self).await
    }
}
