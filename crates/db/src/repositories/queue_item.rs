//! Queue item repository.
//!
//! Storage for the database queue backend. Claims go through a single
//! `UPDATE ... RETURNING` statement so concurrent pollers never receive the
//! same row.

use std::sync::Arc;

use crate::entities::{QueueItem, queue_item};
use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, Set, Statement, Value, prelude::DateTimeWithTimeZone,
    sea_query::Expr,
};

/// Queue item repository for database operations.
#[derive(Clone)]
pub struct QueueItemRepository {
    db: Arc<DatabaseConnection>,
}

impl QueueItemRepository {
    /// Create a new queue item repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert an unclaimed item.
    pub async fn push(
        &self,
        id: String,
        queue_name: &str,
        payload: String,
        available_at: DateTime<Utc>,
    ) -> AppResult<queue_item::Model> {
        let now = Utc::now();
        let model = queue_item::ActiveModel {
            id: Set(id),
            queue_name: Set(queue_name.to_string()),
            payload: Set(payload),
            attempts: Set(0),
            available_at: Set(available_at.into()),
            claimed_at: Set(None),
            created_at: Set(now.into()),
        };

        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Claim the oldest available item of a queue and bump its attempt counter.
    pub async fn claim_next(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<queue_item::Model>> {
        let backend = self.db.get_database_backend();
        let sql = match backend {
            DbBackend::Postgres => {
                r"
                UPDATE queue_item SET claimed_at = $1, attempts = attempts + 1
                WHERE id = (
                    SELECT id FROM queue_item
                    WHERE queue_name = $2 AND claimed_at IS NULL AND available_at <= $3
                    ORDER BY id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, queue_name, payload, attempts, available_at, claimed_at, created_at
                "
            }
            DbBackend::Sqlite => {
                r"
                UPDATE queue_item SET claimed_at = ?, attempts = attempts + 1
                WHERE id = (
                    SELECT id FROM queue_item
                    WHERE queue_name = ? AND claimed_at IS NULL AND available_at <= ?
                    ORDER BY id
                    LIMIT 1
                )
                RETURNING id, queue_name, payload, attempts, available_at, claimed_at, created_at
                "
            }
            DbBackend::MySql => {
                return Err(AppError::Config(
                    "the database queue requires PostgreSQL or SQLite".to_string(),
                ));
            }
        };

        let now: DateTimeWithTimeZone = now.into();
        QueueItem::find()
            .from_raw_sql(Statement::from_sql_and_values(
                backend,
                sql,
                [now.into(), queue_name.into(), now.into()],
            ))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete an item. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> AppResult<bool> {
        let result = QueueItem::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Clear the claim on an item and make it available again at `available_at`.
    pub async fn release(&self, id: &str, available_at: DateTime<Utc>) -> AppResult<bool> {
        let available_at: DateTimeWithTimeZone = available_at.into();
        let result = QueueItem::update_many()
            .col_expr(
                queue_item::Column::ClaimedAt,
                Expr::value(Value::from(None::<DateTimeWithTimeZone>)),
            )
            .col_expr(queue_item::Column::AvailableAt, Expr::value(available_at))
            .filter(queue_item::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Like [`Self::release`], but also takes back the attempt counted by the claim.
    pub async fn defer(&self, id: &str, available_at: DateTime<Utc>) -> AppResult<bool> {
        let available_at: DateTimeWithTimeZone = available_at.into();
        let result = QueueItem::update_many()
            .col_expr(
                queue_item::Column::ClaimedAt,
                Expr::value(Value::from(None::<DateTimeWithTimeZone>)),
            )
            .col_expr(queue_item::Column::AvailableAt, Expr::value(available_at))
            .col_expr(
                queue_item::Column::Attempts,
                Expr::col(queue_item::Column::Attempts).sub(1),
            )
            .filter(queue_item::Column::Id.eq(id))
            .filter(queue_item::Column::Attempts.gt(0))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected > 0)
    }

    /// Release every claim taken before `claimed_before`.
    pub async fn reclaim_stale(&self, claimed_before: DateTime<Utc>) -> AppResult<u64> {
        let claimed_before: DateTimeWithTimeZone = claimed_before.into();
        let result = QueueItem::update_many()
            .col_expr(
                queue_item::Column::ClaimedAt,
                Expr::value(Value::from(None::<DateTimeWithTimeZone>)),
            )
            .filter(queue_item::Column::ClaimedAt.is_not_null())
            .filter(queue_item::Column::ClaimedAt.lt(claimed_before))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }

    /// Find an item by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<queue_item::Model>> {
        QueueItem::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Items in a queue, claimed or not.
    pub async fn count_by_queue(&self, queue_name: &str) -> AppResult<u64> {
        QueueItem::find()
            .filter(queue_item::Column::QueueName.eq(queue_name))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
