//! Dead letter repository.

use std::sync::Arc;

use crate::entities::{DeadLetter, dead_letter};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};

/// Dead letter repository for database operations.
#[derive(Clone)]
pub struct DeadLetterRepository {
    db: Arc<DatabaseConnection>,
}

impl DeadLetterRepository {
    /// Create a new dead letter repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Store a dead letter.
    pub async fn create(&self, model: dead_letter::ActiveModel) -> AppResult<dead_letter::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a dead letter by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<dead_letter::Model>> {
        DeadLetter::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Newest dead letters first, optionally for one queue.
    pub async fn list(
        &self,
        queue_name: Option<&str>,
        limit: u64,
    ) -> AppResult<Vec<dead_letter::Model>> {
        let mut query = DeadLetter::find().order_by_desc(dead_letter::Column::Id);

        if let Some(queue_name) = queue_name {
            query = query.filter(dead_letter::Column::QueueName.eq(queue_name));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Remove a dead letter.
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let result = DeadLetter::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Count dead letters.
    pub async fn count(&self) -> AppResult<u64> {
        DeadLetter::find()
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
