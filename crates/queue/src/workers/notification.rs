//! Local notification worker.

use async_trait::async_trait;
use herald_common::{DeliveryOutcome, IdGenerator};
use herald_db::repositories::{NewNotification, NotificationInsert, NotificationRepository};
use tracing::{debug, warn};

use crate::backend::Job;
use crate::jobs::NotifyJob;
use crate::registry::JobHandler;

/// Writes notification rows, at most one per idempotency key.
#[derive(Clone)]
pub struct NotificationWorker {
    notifications: NotificationRepository,
    id_gen: IdGenerator,
}

impl NotificationWorker {
    /// Create a worker writing through `notifications`.
    #[must_use]
    pub const fn new(notifications: NotificationRepository) -> Self {
        Self {
            notifications,
            id_gen: IdGenerator::new(),
        }
    }
}

#[async_trait]
impl JobHandler for NotificationWorker {
    async fn handle(&self, job: &Job) -> DeliveryOutcome {
        let notify: NotifyJob = match job.decode() {
            Ok(notify) => notify,
            Err(e) => return DeliveryOutcome::permanent(e.to_string()),
        };

        let new = NewNotification {
            id: self.id_gen.generate(),
            notifiee_id: notify.notifiee_id,
            notifier_id: notify.notifier_id,
            activity_id: notify.activity_id,
            verb: notify.verb,
            reason: notify.reason,
            idempotency_key: notify.idempotency_key,
        };
        let key = new.idempotency_key.clone();

        match self.notifications.insert_idempotent(new).await {
            Ok(NotificationInsert::Created) => {
                debug!(job_id = %job.id, key = %key, "Notification created");
                DeliveryOutcome::Delivered
            }
            Ok(NotificationInsert::Duplicate) => {
                debug!(job_id = %job.id, key = %key, "Notification already exists");
                DeliveryOutcome::Delivered
            }
            Err(e) if e.is_transient() => {
                warn!(job_id = %job.id, key = %key, error = %e, "Notification insert failed");
                DeliveryOutcome::retryable(e.to_string())
            }
            Err(e) => DeliveryOutcome::permanent(e.to_string()),
        }
    }
}
