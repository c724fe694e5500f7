//! Queue-backed dispatch for the fan-out engine.

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::AppResult;
use herald_core::{LocalNotification, NotificationDispatch, RemoteDelivery};
use herald_federation::ActivityRenderer;
use tracing::{debug, info};

use crate::jobs::{DeliverJob, FEDERATION_QUEUE, NOTIFICATION_QUEUE};
use crate::manager::QueueManager;

/// Turns fan-out results into `notification` and `federation` jobs.
#[derive(Clone)]
pub struct QueueDispatch {
    manager: Arc<QueueManager>,
    renderer: ActivityRenderer,
}

impl QueueDispatch {
    /// Create a dispatch enqueuing through `manager`.
    #[must_use]
    pub const fn new(manager: Arc<QueueManager>, renderer: ActivityRenderer) -> Self {
        Self { manager, renderer }
    }
}

#[async_trait]
impl NotificationDispatch for QueueDispatch {
    async fn queue_local_notification(&self, notification: LocalNotification) -> AppResult<()> {
        let job_id = self
            .manager
            .enqueue_job(NOTIFICATION_QUEUE, &notification)
            .await?;

        debug!(
            job_id = %job_id,
            notifiee_id = %notification.notifiee_id,
            activity_id = %notification.activity_id,
            "Queued notification"
        );
        Ok(())
    }

    async fn queue_remote_delivery(&self, delivery: RemoteDelivery) -> AppResult<()> {
        let activity = self.renderer.render(&delivery.sender, &delivery.activity)?;
        let job = DeliverJob {
            sender_id: delivery.sender.id.clone(),
            activity_id: delivery.activity.id.clone(),
            inbox: delivery.inbox,
            target_actor_ids: delivery.target_actor_ids,
            activity,
        };

        let job_id = self.manager.enqueue_job(FEDERATION_QUEUE, &job).await?;

        info!(
            job_id = %job_id,
            activity_id = %job.activity_id,
            inbox = %job.inbox,
            shared = delivery.is_shared,
            recipients = job.target_actor_ids.len(),
            "Queued activity delivery"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::{DatabaseBackend, Job, QueueBackend};
    use crate::jobs::NotifyJob;
    use crate::manager::QueueSettings;
    use crate::registry::{HandlerRegistry, JobHandler};
    use chrono::Utc;
    use herald_common::{DeliveryOutcome, QueueConfig};
    use herald_core::{Activity, Actor, ActorKind, Verb};
    use herald_db::repositories::{DeadLetterRepository, QueueItemRepository};
    use herald_db::test_utils::TestDatabase;

    struct Accept;

    #[async_trait]
    impl JobHandler for Accept {
        async fn handle(&self, _job: &Job) -> DeliveryOutcome {
            DeliveryOutcome::Delivered
        }
    }

    fn dispatch(db: &TestDatabase) -> QueueDispatch {
        let mut registry = HandlerRegistry::new();
        registry.register(NOTIFICATION_QUEUE, Arc::new(Accept));
        registry.register(FEDERATION_QUEUE, Arc::new(Accept));
        let manager = QueueManager::new(
            Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.connection()))),
            Arc::new(registry),
            Arc::new(DeadLetterRepository::new(db.connection())),
            QueueSettings::from(&QueueConfig::default()),
        );
        QueueDispatch::new(
            Arc::new(manager),
            ActivityRenderer::new("https://local.example").unwrap(),
        )
    }

    fn alice() -> Actor {
        Actor {
            id: "alice".to_string(),
            uri: "https://local.example/users/alice".to_string(),
            kind: ActorKind::Person,
            is_local: true,
            inbox: None,
            shared_inbox: None,
        }
    }

    fn post() -> Activity {
        Activity {
            id: "act1".to_string(),
            verb: Verb::Post,
            actor_id: "alice".to_string(),
            object_id: Some("note1".to_string()),
            object_uri: None,
            addressee_ids: Vec::new(),
            group_ids: Vec::new(),
            created_at: Utc::now(),
            content: Some("hello".to_string()),
        }
    }

    #[tokio::test]
    async fn test_local_notification_becomes_job() {
        let db = TestDatabase::new().await.unwrap();
        let notification = LocalNotification {
            notifiee_id: "bob".to_string(),
            notifier_id: "alice".to_string(),
            activity_id: "act1".to_string(),
            verb: "post".to_string(),
            reason: "subscriber".to_string(),
            idempotency_key: "act1:bob".to_string(),
        };

        dispatch(&db)
            .queue_local_notification(notification.clone())
            .await
            .unwrap();

        let backend = DatabaseBackend::new(QueueItemRepository::new(db.connection()));
        let job = backend.poll(NOTIFICATION_QUEUE).await.unwrap().unwrap();
        assert_eq!(job.decode::<NotifyJob>().unwrap(), notification);
    }

    #[tokio::test]
    async fn test_remote_delivery_renders_activity() {
        let db = TestDatabase::new().await.unwrap();

        dispatch(&db)
            .queue_remote_delivery(RemoteDelivery {
                sender: alice(),
                activity: post(),
                inbox: "https://remote.example/inbox".to_string(),
                target_actor_ids: vec!["carol".to_string(), "dave".to_string()],
                is_shared: true,
            })
            .await
            .unwrap();

        let backend = DatabaseBackend::new(QueueItemRepository::new(db.connection()));
        let job: DeliverJob = backend
            .poll(FEDERATION_QUEUE)
            .await
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(job.sender_id, "alice");
        assert_eq!(job.inbox, "https://remote.example/inbox");
        assert_eq!(job.target_actor_ids, vec!["carol", "dave"]);
        assert_eq!(job.activity["type"], "Create");
        assert_eq!(job.activity["actor"], "https://local.example/users/alice");
    }
}
