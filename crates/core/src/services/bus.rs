//! In-process activity bus.
//!
//! The web application can publish [`ActivityCreated`] messages instead of
//! calling [`FanOutService::fan_out`] directly. Publishing returns as soon as
//! the message is buffered.

use std::sync::Arc;

use herald_common::{AppError, AppResult};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info};

use crate::model::{Activity, Actor};
use crate::services::fanout::FanOutService;

/// Maximum number of fan-outs running at once.
const MAX_CONCURRENT_FANOUTS: usize = 4;

/// Channel buffer size for messages.
const BUS_BUFFER_SIZE: usize = 1000;

/// A newly persisted activity.
#[derive(Debug, Clone)]
pub struct ActivityCreated {
    /// Author.
    pub sender: Actor,
    /// The activity.
    pub activity: Activity,
    /// Actor ids already notified by the caller.
    pub already_known: Vec<String>,
    /// Reason override for local notifications.
    pub reason: Option<String>,
}

/// Publishing half of the bus.
#[derive(Clone)]
pub struct ActivityPublisher {
    sender: mpsc::Sender<ActivityCreated>,
}

impl ActivityPublisher {
    /// Publish an activity for fan-out.
    pub async fn publish(&self, message: ActivityCreated) -> AppResult<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| AppError::Internal("activity bus is closed".to_string()))
    }
}

/// Consuming half of the bus.
pub struct ActivityBus {
    receiver: mpsc::Receiver<ActivityCreated>,
}

impl ActivityBus {
    /// Create a bus and its publisher.
    #[must_use]
    pub fn channel() -> (ActivityPublisher, Self) {
        let (sender, receiver) = mpsc::channel(BUS_BUFFER_SIZE);
        (ActivityPublisher { sender }, Self { receiver })
    }

    /// Fan out every published activity until all publishers are dropped.
    pub async fn run(mut self, service: Arc<FanOutService>) {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FANOUTS));
        let mut tasks = tokio::task::JoinSet::new();
        info!("Activity bus started");

        while let Some(message) = self.receiver.recv().await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let service = service.clone();

            tasks.spawn(async move {
                let _permit = permit;
                process_message(&service, message).await;
            });

            // Reap finished tasks so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        info!("Activity bus stopped");
    }
}

async fn process_message(service: &FanOutService, message: ActivityCreated) {
    let ActivityCreated {
        sender,
        activity,
        already_known,
        reason,
    } = message;

    match service
        .fan_out(&sender, &activity, &already_known, reason.as_deref())
        .await
    {
        Ok(report) => {
            debug!(activity_id = %activity.id, ?report, "Activity fanned out");
        }
        Err(e) => {
            error!(
                activity_id = %activity.id,
                sender_id = %sender.id,
                error = %e,
                "Fan-out failed"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Verb;
    use crate::services::dispatch::NoOpDispatch;
    use crate::services::fanout::FanOutPolicy;
    use chrono::Utc;
    use herald_db::repositories::{AudienceRepository, FanoutReceiptRepository};
    use herald_db::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_published_activity_is_fanned_out() {
        let db = TestDatabase::new().await.unwrap();
        let author = Actor::from(db.local_actor("author").await);
        db.local_actor("bob").await;
        db.subscribe("bob", "author").await;

        let receipts = FanoutReceiptRepository::new(db.connection());
        let service = Arc::new(FanOutService::new(
            Arc::new(AudienceRepository::new(db.connection())),
            Arc::new(receipts.clone()),
            Arc::new(NoOpDispatch),
            FanOutPolicy::default(),
        ));

        let (publisher, bus) = ActivityBus::channel();
        let handle = tokio::spawn(bus.run(service));

        publisher
            .publish(ActivityCreated {
                sender: author,
                activity: Activity {
                    id: "act1".to_string(),
                    verb: Verb::Like,
                    actor_id: "author".to_string(),
                    object_id: None,
                    object_uri: None,
                    addressee_ids: vec![],
                    group_ids: vec![],
                    created_at: Utc::now(),
                    content: None,
                },
                already_known: vec![],
                reason: None,
            })
            .await
            .unwrap();
        drop(publisher);
        handle.await.unwrap();

        assert!(receipts.exists(&crate::idempotency_key("act1", "bob")).await.unwrap());
    }
}
