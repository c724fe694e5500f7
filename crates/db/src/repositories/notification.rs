//! Notification repository.

use std::sync::Arc;

use crate::entities::{Actor, Notification, notification};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, sea_query::OnConflict,
};

/// Values for a notification row.
#[derive(Debug, Clone)]
pub struct NewNotification {
    /// Row id.
    pub id: String,
    /// Receiving actor.
    pub notifiee_id: String,
    /// Actor whose activity triggered the notification.
    pub notifier_id: String,
    /// Activity id.
    pub activity_id: String,
    /// Activity verb.
    pub verb: String,
    /// Why the notifiee was targeted.
    pub reason: String,
    /// Unique per (activity, notifiee).
    pub idempotency_key: String,
}

/// Result of [`NotificationRepository::insert_idempotent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationInsert {
    /// A new row was written.
    Created,
    /// A row with the same idempotency key already existed.
    Duplicate,
}

/// Notification repository for database operations.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    /// Create a new notification repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert a notification unless one with the same idempotency key exists.
    ///
    /// Returns [`AppError::ActorNotFound`] when the notifiee no longer exists.
    pub async fn insert_idempotent(&self, new: NewNotification) -> AppResult<NotificationInsert> {
        let exists = Actor::find_by_id(&new.notifiee_id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .is_some();
        if !exists {
            return Err(AppError::ActorNotFound(new.notifiee_id));
        }

        let model = notification::ActiveModel {
            id: Set(new.id),
            notifiee_id: Set(new.notifiee_id),
            notifier_id: Set(new.notifier_id),
            activity_id: Set(new.activity_id),
            verb: Set(new.verb),
            reason: Set(new.reason),
            idempotency_key: Set(new.idempotency_key),
            is_read: Set(false),
            created_at: Set(chrono::Utc::now().into()),
        };

        let inserted = Notification::insert(model)
            .on_conflict(
                OnConflict::column(notification::Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(if inserted == 0 {
            NotificationInsert::Duplicate
        } else {
            NotificationInsert::Created
        })
    }

    /// Find a notification by idempotency key.
    pub async fn find_by_key(&self, key: &str) -> AppResult<Option<notification::Model>> {
        Notification::find()
            .filter(notification::Column::IdempotencyKey.eq(key))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get notifications for an actor, newest first.
    pub async fn find_by_notifiee(
        &self,
        notifiee_id: &str,
        limit: u64,
    ) -> AppResult<Vec<notification::Model>> {
        Notification::find()
            .filter(notification::Column::NotifieeId.eq(notifiee_id))
            .order_by_desc(notification::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count notifications about one activity.
    pub async fn count_by_activity(&self, activity_id: &str) -> AppResult<u64> {
        Notification::find()
            .filter(notification::Column::ActivityId.eq(activity_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::TestDatabase;

    fn new_notification(id: &str, notifiee: &str) -> NewNotification {
        NewNotification {
            id: id.to_string(),
            notifiee_id: notifiee.to_string(),
            notifier_id: "author".to_string(),
            activity_id: "act1".to_string(),
            verb: "post".to_string(),
            reason: "subscriber".to_string(),
            idempotency_key: format!("act1:{notifiee}"),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let db = TestDatabase::new().await.unwrap();
        db.local_actor("author").await;
        db.local_actor("bob").await;
        let repo = NotificationRepository::new(db.connection());

        let first = repo
            .insert_idempotent(new_notification("n1", "bob"))
            .await
            .unwrap();
        let second = repo
            .insert_idempotent(new_notification("n2", "bob"))
            .await
            .unwrap();

        assert_eq!(first, NotificationInsert::Created);
        assert_eq!(second, NotificationInsert::Duplicate);
        assert_eq!(repo.count_by_activity("act1").await.unwrap(), 1);
        assert_eq!(repo.find_by_notifiee("bob", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_notifiee() {
        let db = TestDatabase::new().await.unwrap();
        let repo = NotificationRepository::new(db.connection());

        let err = repo
            .insert_idempotent(new_notification("n1", "ghost"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::ActorNotFound(id) if id == "ghost"));
    }
}
