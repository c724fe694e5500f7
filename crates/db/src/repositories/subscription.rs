//! Subscription repository.

use std::sync::Arc;

use crate::entities::{Subscription, subscription};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QuerySelect,
};

/// Subscription repository for database operations.
#[derive(Clone)]
pub struct SubscriptionRepository {
    db: Arc<DatabaseConnection>,
}

impl SubscriptionRepository {
    /// Create a new subscription repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a subscription by subscriber and subscribed actor.
    pub async fn find_by_pair(
        &self,
        subscriber_id: &str,
        subscribed_id: &str,
    ) -> AppResult<Option<subscription::Model>> {
        Subscription::find()
            .filter(subscription::Column::SubscriberId.eq(subscriber_id))
            .filter(subscription::Column::SubscribedId.eq(subscribed_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Check if an actor subscribes to another.
    pub async fn is_subscribed(&self, subscriber_id: &str, subscribed_id: &str) -> AppResult<bool> {
        Ok(self.find_by_pair(subscriber_id, subscribed_id).await?.is_some())
    }

    /// IDs of every actor subscribed to `subscribed_id`.
    pub async fn find_subscriber_ids(&self, subscribed_id: &str) -> AppResult<Vec<String>> {
        Subscription::find()
            .select_only()
            .column(subscription::Column::SubscriberId)
            .filter(subscription::Column::SubscribedId.eq(subscribed_id))
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new subscription.
    pub async fn create(
        &self,
        model: subscription::ActiveModel,
    ) -> AppResult<subscription::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a subscription by pair.
    pub async fn delete_by_pair(&self, subscriber_id: &str, subscribed_id: &str) -> AppResult<()> {
        if let Some(s) = self.find_by_pair(subscriber_id, subscribed_id).await? {
            s.delete(self.db.as_ref())
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }
        Ok(())
    }
}
