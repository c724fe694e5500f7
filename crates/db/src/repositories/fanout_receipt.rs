//! Fan-out receipt repository.

use std::sync::Arc;

use crate::entities::{FanoutReceipt, fanout_receipt};
use chrono::{DateTime, Utc};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    prelude::DateTimeWithTimeZone, sea_query::OnConflict,
};

/// Fan-out receipt repository for database operations.
#[derive(Clone)]
pub struct FanoutReceiptRepository {
    db: Arc<DatabaseConnection>,
}

impl FanoutReceiptRepository {
    /// Create a new receipt repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record a key. Returns false if it was already recorded.
    pub async fn claim(&self, key: &str) -> AppResult<bool> {
        let model = fanout_receipt::ActiveModel {
            key: Set(key.to_string()),
            created_at: Set(Utc::now().into()),
        };

        let inserted = FanoutReceipt::insert(model)
            .on_conflict(
                OnConflict::column(fanout_receipt::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(inserted > 0)
    }

    /// Forget a key so a later fan-out may dispatch it again.
    pub async fn release(&self, key: &str) -> AppResult<()> {
        FanoutReceipt::delete_by_id(key)
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Check whether a key is recorded.
    pub async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(FanoutReceipt::find_by_id(key)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .is_some())
    }

    /// Delete receipts recorded before `before`.
    pub async fn prune(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let before: DateTimeWithTimeZone = before.into();
        let result = FanoutReceipt::delete_many()
            .filter(fanout_receipt::Column::CreatedAt.lt(before))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(result.rows_affected)
    }
}
