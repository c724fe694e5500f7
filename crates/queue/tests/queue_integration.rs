//! Queue integration tests.
//!
//! Run the fan-out engine, the queue manager and the standard handlers
//! together on an in-memory database.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use herald_common::{AppError, DeliveryOutcome, QueueConfig};
use herald_core::{Activity, Actor, FanOutPolicy, FanOutService, Verb, idempotency_key};
use herald_db::repositories::{
    AudienceRepository, DeadLetterRepository, FanoutReceiptRepository, NotificationRepository,
    QueueItemRepository,
};
use herald_db::test_utils::TestDatabase;
use herald_federation::ActivityRenderer;
use herald_queue::{
    DatabaseBackend, DeliverJob, FEDERATION_QUEUE, HandlerRegistry, InProcessBackend, Job,
    JobHandler, NOTIFICATION_QUEUE, NotificationWorker, QueueBackend, QueueDispatch, QueueManager,
    QueueSettings, RetryConfig,
};

/// Records federation jobs instead of pushing them.
#[derive(Default)]
struct RecordingDelivery {
    jobs: Mutex<Vec<DeliverJob>>,
}

#[async_trait]
impl JobHandler for RecordingDelivery {
    async fn handle(&self, job: &Job) -> DeliveryOutcome {
        match job.decode::<DeliverJob>() {
            Ok(deliver) => {
                self.jobs.lock().unwrap().push(deliver);
                DeliveryOutcome::Delivered
            }
            Err(e) => DeliveryOutcome::permanent(e.to_string()),
        }
    }
}

/// Always fails with a transient error.
struct Unavailable;

#[async_trait]
impl JobHandler for Unavailable {
    async fn handle(&self, _job: &Job) -> DeliveryOutcome {
        DeliveryOutcome::retryable("remote server error (503)")
    }
}

fn settings(max_attempts: u32) -> QueueSettings {
    QueueSettings {
        queues: vec![NOTIFICATION_QUEUE.to_string(), FEDERATION_QUEUE.to_string()],
        poll_interval: Duration::from_millis(10),
        claim_timeout: Duration::from_secs(3600),
        retry: RetryConfig {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
        },
    }
}

fn registry(db: &TestDatabase, delivery: Arc<RecordingDelivery>) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(
        NOTIFICATION_QUEUE,
        Arc::new(NotificationWorker::new(NotificationRepository::new(
            db.connection(),
        ))),
    );
    registry.register(FEDERATION_QUEUE, delivery);
    Arc::new(registry)
}

fn fan_out_service(db: &TestDatabase, manager: Arc<QueueManager>) -> FanOutService {
    let dispatch = QueueDispatch::new(
        manager,
        ActivityRenderer::new("https://local.example").unwrap(),
    );
    FanOutService::new(
        Arc::new(AudienceRepository::new(db.connection())),
        Arc::new(FanoutReceiptRepository::new(db.connection())),
        Arc::new(dispatch),
        FanOutPolicy::default(),
    )
}

/// 3 local subscribers (one blocking the author) and 2 remote subscribers
/// behind one shared inbox.
async fn seed_scenario(db: &TestDatabase) -> Actor {
    let author = Actor::from(db.local_actor("author").await);
    for id in ["l1", "l2", "l3"] {
        db.local_actor(id).await;
        db.subscribe(id, "author").await;
    }
    db.block("l3", "author").await;
    for id in ["r1", "r2"] {
        db.remote_actor(id, "remote.example", true).await;
        db.subscribe(id, "author").await;
    }
    author
}

fn post(id: &str) -> Activity {
    Activity {
        id: id.to_string(),
        verb: Verb::Post,
        actor_id: "author".to_string(),
        object_id: Some(format!("note-{id}")),
        object_uri: None,
        addressee_ids: vec![],
        group_ids: vec![],
        created_at: Utc::now(),
        content: Some("hello fediverse".to_string()),
    }
}

async fn drain(manager: &QueueManager) -> usize {
    let mut total = 0;
    loop {
        let processed = manager.run_once().await.unwrap();
        if processed == 0 {
            return total;
        }
        total += processed;
    }
}

#[tokio::test]
async fn test_fan_out_through_database_queue() {
    let db = TestDatabase::new().await.unwrap();
    let author = seed_scenario(&db).await;
    let delivery = Arc::new(RecordingDelivery::default());
    let manager = Arc::new(QueueManager::new(
        Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.connection()))),
        registry(&db, delivery.clone()),
        Arc::new(DeadLetterRepository::new(db.connection())),
        settings(5),
    ));
    manager.validate().unwrap();
    let service = fan_out_service(&db, manager.clone());

    let report = service.fan_out(&author, &post("act1"), &[], None).await.unwrap();
    assert_eq!(report.local_queued, 2);
    assert_eq!(report.remote_batches, 1);
    assert_eq!(report.blocked, 1);
    assert_eq!(
        manager.depths().await.unwrap(),
        vec![
            (NOTIFICATION_QUEUE.to_string(), Some(2)),
            (FEDERATION_QUEUE.to_string(), Some(1)),
        ]
    );

    assert_eq!(drain(&manager).await, 3);

    let notifications = NotificationRepository::new(db.connection());
    assert_eq!(notifications.count_by_activity("act1").await.unwrap(), 2);
    assert!(
        notifications
            .find_by_key(&idempotency_key("act1", "l1"))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        notifications
            .find_by_key(&idempotency_key("act1", "l3"))
            .await
            .unwrap()
            .is_none()
    );

    let jobs = delivery.jobs.lock().unwrap().clone();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].inbox, "https://remote.example/inbox");
    let mut recipients = jobs[0].target_actor_ids.clone();
    recipients.sort_unstable();
    assert_eq!(recipients, vec!["r1", "r2"]);
    assert_eq!(jobs[0].activity["type"], "Create");
}

#[tokio::test]
async fn test_repeated_fan_out_adds_nothing() {
    let db = TestDatabase::new().await.unwrap();
    let author = seed_scenario(&db).await;
    let delivery = Arc::new(RecordingDelivery::default());
    let manager = Arc::new(QueueManager::new(
        Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.connection()))),
        registry(&db, delivery.clone()),
        Arc::new(DeadLetterRepository::new(db.connection())),
        settings(5),
    ));
    let service = fan_out_service(&db, manager.clone());
    let activity = post("act1");

    service.fan_out(&author, &activity, &[], None).await.unwrap();
    drain(&manager).await;
    let again = service.fan_out(&author, &activity, &[], None).await.unwrap();

    assert_eq!(again.local_queued, 0);
    assert_eq!(again.remote_batches, 0);
    assert_eq!(drain(&manager).await, 0);
    assert_eq!(
        NotificationRepository::new(db.connection())
            .count_by_activity("act1")
            .await
            .unwrap(),
        2
    );
    assert_eq!(delivery.jobs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_fan_out_through_in_process_backend() {
    let db = TestDatabase::new().await.unwrap();
    let author = seed_scenario(&db).await;
    let delivery = Arc::new(RecordingDelivery::default());
    let registry = registry(&db, delivery.clone());
    let manager = Arc::new(QueueManager::new(
        Arc::new(InProcessBackend::new(registry.clone())),
        registry,
        Arc::new(DeadLetterRepository::new(db.connection())),
        settings(5),
    ));
    let service = fan_out_service(&db, manager.clone());

    let report = service.fan_out(&author, &post("act1"), &[], None).await.unwrap();

    // Work ran during enqueue; nothing is left to poll.
    assert_eq!(report.local_queued, 2);
    assert_eq!(manager.run_once().await.unwrap(), 0);
    assert_eq!(
        NotificationRepository::new(db.connection())
            .count_by_activity("act1")
            .await
            .unwrap(),
        2
    );
    assert_eq!(delivery.jobs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_in_process_failure_reaches_caller() {
    let mut registry = HandlerRegistry::new();
    registry.register(FEDERATION_QUEUE, Arc::new(Unavailable));
    let backend = InProcessBackend::new(Arc::new(registry));

    let err = backend
        .enqueue(FEDERATION_QUEUE, serde_json::json!({ "inbox": "https://remote.example/inbox" }))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Queue(_)));
}

#[tokio::test]
async fn test_round_trip_preserves_payload() {
    let db = TestDatabase::new().await.unwrap();
    let backend = DatabaseBackend::new(QueueItemRepository::new(db.connection()));
    let payload = serde_json::json!({
        "notifiee_id": "bob",
        "nested": { "list": [1, 2, 3], "unicode": "héllo ✓" },
        "flag": true,
    });

    let id = backend.enqueue("email", payload.clone()).await.unwrap();
    let job = backend.poll("email").await.unwrap().unwrap();

    assert_eq!(job.id, id);
    assert_eq!(job.queue, "email");
    assert_eq!(job.payload, payload);
    assert_eq!(job.attempts, 1);
    backend.ack(&job).await.unwrap();
    assert!(backend.poll("email").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_pollers_never_share_a_job() {
    let db = TestDatabase::new().await.unwrap();
    let backend = DatabaseBackend::new(QueueItemRepository::new(db.connection()));
    for n in 0..20 {
        backend
            .enqueue("email", serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let backend = backend.clone();
            tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = backend.poll("email").await.unwrap() {
                    claimed.push(job.id);
                    tokio::task::yield_now().await;
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();

    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}

#[tokio::test]
async fn test_retry_bound_then_replay() {
    let db = TestDatabase::new().await.unwrap();
    let mut registry = HandlerRegistry::new();
    registry.register(FEDERATION_QUEUE, Arc::new(Unavailable));
    let manager = QueueManager::new(
        Arc::new(DatabaseBackend::new(QueueItemRepository::new(db.connection()))),
        Arc::new(registry),
        Arc::new(DeadLetterRepository::new(db.connection())),
        QueueSettings {
            queues: vec![FEDERATION_QUEUE.to_string()],
            ..settings(4)
        },
    );
    let payload = serde_json::json!({ "inbox": "https://remote.example/inbox" });

    manager.enqueue(FEDERATION_QUEUE, payload.clone()).await.unwrap();
    assert_eq!(drain(&manager).await, 4);

    let dead = manager.dead_letters(Some(FEDERATION_QUEUE), 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 4);
    assert_eq!(dead[0].payload, payload);

    manager.replay_dead_letter(&dead[0].id).await.unwrap();
    assert_eq!(manager.dead_letter_count().await.unwrap(), 0);
    assert_eq!(drain(&manager).await, 4);
    assert_eq!(manager.dead_letter_count().await.unwrap(), 1);
}

#[test]
fn test_settings_follow_queue_config() {
    let config = QueueConfig {
        max_attempts: 7,
        ..QueueConfig::default()
    };
    let settings = QueueSettings::from(&config);

    assert_eq!(settings.retry.max_attempts, 7);
    assert_eq!(settings.queues, config.queues);
}
