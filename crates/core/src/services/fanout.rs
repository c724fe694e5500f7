//! Notification fan-out engine.
//!
//! Computes who should hear about an activity and dispatches one local
//! notification job per local target and one delivery job per remote inbox.
//! A failing recipient is counted and skipped; it never aborts the rest of
//! the batch.

use std::sync::Arc;

use herald_common::{AppError, AppResult, FanOutConfig};
use tracing::{debug, info, warn};

use crate::idempotency_key;
use crate::model::{Activity, Actor};
use crate::services::audience::{Audience, AudienceSource};
use crate::services::dispatch::{DispatchService, LocalNotification, RemoteDelivery};
use crate::services::receipt::ReceiptLedger;
use crate::shared_inbox::{BatchDeliveryTarget, RecipientInfo};
use crate::targets::{Target, TargetReason, TargetSet};

/// Fan-out policy switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FanOutPolicy {
    /// Notify the author about their own activity.
    pub notify_self: bool,
}

impl From<&FanOutConfig> for FanOutPolicy {
    fn from(config: &FanOutConfig) -> Self {
        Self {
            notify_self: config.notify_self,
        }
    }
}

/// What one fan-out did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Local notification jobs dispatched.
    pub local_queued: usize,
    /// Remote delivery jobs dispatched.
    pub remote_batches: usize,
    /// Remote actors covered by those jobs.
    pub remote_recipients: usize,
    /// Targets dropped because they blocked the author.
    pub blocked: usize,
    /// Targets skipped because their key was already dispatched.
    pub duplicates: usize,
    /// Remote targets without any inbox.
    pub unreachable: usize,
    /// Dispatches or ledger writes that failed.
    pub failures: usize,
}

/// Notification fan-out service.
#[derive(Clone)]
pub struct FanOutService {
    audience: Arc<dyn AudienceSource>,
    ledger: Arc<dyn ReceiptLedger>,
    dispatch: DispatchService,
    policy: FanOutPolicy,
}

impl FanOutService {
    /// Create a new fan-out service.
    #[must_use]
    pub fn new(
        audience: Arc<dyn AudienceSource>,
        ledger: Arc<dyn ReceiptLedger>,
        dispatch: DispatchService,
        policy: FanOutPolicy,
    ) -> Self {
        Self {
            audience,
            ledger,
            dispatch,
            policy,
        }
    }

    /// Fan out `activity` authored by `sender`.
    ///
    /// `already_known` lists actor ids the caller has notified through other
    /// means. `reason` overrides the per-target reason recorded on local
    /// notifications.
    ///
    /// Only reading the audience can fail; per-recipient failures are
    /// reported in [`FanOutReport::failures`].
    pub async fn fan_out(
        &self,
        sender: &Actor,
        activity: &Activity,
        already_known: &[String],
        reason: Option<&str>,
    ) -> AppResult<FanOutReport> {
        if activity.actor_id != sender.id {
            return Err(AppError::InvalidPayload(format!(
                "activity {} is not authored by {}",
                activity.id, sender.id
            )));
        }

        let audience = self.audience.snapshot(activity).await?;
        let mut targets = self.build_targets(sender, &audience, already_known);
        let mut report = FanOutReport::default();

        let blocked: Vec<String> = targets
            .iter()
            .filter(|t| audience.has_blocked_author(&t.actor.id))
            .map(|t| t.actor.id.clone())
            .collect();
        for target_id in blocked {
            targets.remove(&target_id);
            report.blocked += 1;
            info!(
                activity_id = %activity.id,
                target_id = %target_id,
                "Target has blocked the author, not notifying"
            );
        }

        let (local, remote) = targets.partition_local();

        for target in local {
            self.notify_local(sender, activity, &target, reason, &mut report)
                .await;
        }

        if sender.is_local {
            self.deliver_remote(sender, activity, remote, &mut report)
                .await;
        } else if !remote.is_empty() {
            debug!(
                activity_id = %activity.id,
                sender_id = %sender.id,
                "Remote author, skipping federation delivery"
            );
        }

        info!(
            activity_id = %activity.id,
            verb = %activity.verb,
            local_queued = report.local_queued,
            remote_batches = report.remote_batches,
            blocked = report.blocked,
            duplicates = report.duplicates,
            failures = report.failures,
            "Fan-out complete"
        );

        Ok(report)
    }

    fn build_targets(
        &self,
        sender: &Actor,
        audience: &Audience,
        already_known: &[String],
    ) -> TargetSet {
        let mut targets = TargetSet::new();

        let candidates = audience
            .addressee_ids
            .iter()
            .map(|id| (id, TargetReason::Addressee))
            .chain(
                audience
                    .group_member_ids
                    .iter()
                    .map(|id| (id, TargetReason::GroupMember)),
            )
            .chain(
                audience
                    .subscriber_ids
                    .iter()
                    .map(|id| (id, TargetReason::Subscriber)),
            );

        for (id, reason) in candidates {
            match audience.actor(id) {
                Some(actor) => {
                    targets.insert(actor.clone(), reason);
                }
                None => debug!(actor_id = %id, "Unknown actor in audience, skipping"),
            }
        }

        if !self.policy.notify_self {
            targets.remove(&sender.id);
        }
        for id in already_known {
            targets.remove(id);
        }

        targets
    }

    async fn notify_local(
        &self,
        sender: &Actor,
        activity: &Activity,
        target: &Target,
        reason: Option<&str>,
        report: &mut FanOutReport,
    ) {
        if target.actor.is_group() {
            // Group rosters are not checked against membership here.
            debug!(
                activity_id = %activity.id,
                group_id = %target.actor.id,
                "Notifying local group without roster verification"
            );
        }

        let key = idempotency_key(&activity.id, &target.actor.id);
        match self.ledger.claim(&key).await {
            Ok(true) => {}
            Ok(false) => {
                report.duplicates += 1;
                debug!(key = %key, "Notification already dispatched");
                return;
            }
            Err(e) => {
                report.failures += 1;
                warn!(key = %key, error = %e, "Failed to record fan-out receipt");
                return;
            }
        }

        let notification = LocalNotification {
            notifiee_id: target.actor.id.clone(),
            notifier_id: sender.id.clone(),
            activity_id: activity.id.clone(),
            verb: activity.verb.as_str().to_string(),
            reason: reason.unwrap_or(target.reason.as_str()).to_string(),
            idempotency_key: key.clone(),
        };

        match self.dispatch.queue_local_notification(notification).await {
            Ok(()) => report.local_queued += 1,
            Err(e) => {
                report.failures += 1;
                warn!(
                    activity_id = %activity.id,
                    target_id = %target.actor.id,
                    error = %e,
                    "Failed to queue local notification"
                );
                self.release(&key).await;
            }
        }
    }

    async fn deliver_remote(
        &self,
        sender: &Actor,
        activity: &Activity,
        remote: Vec<Target>,
        report: &mut FanOutReport,
    ) {
        let mut recipients = Vec::with_capacity(remote.len());

        for target in remote {
            let Some(recipient) = RecipientInfo::from_actor(&target.actor) else {
                report.unreachable += 1;
                warn!(
                    activity_id = %activity.id,
                    target_id = %target.actor.id,
                    "Remote actor has no inbox, skipping"
                );
                continue;
            };

            let key = idempotency_key(&activity.id, &target.actor.id);
            match self.ledger.claim(&key).await {
                Ok(true) => recipients.push(recipient),
                Ok(false) => report.duplicates += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!(key = %key, error = %e, "Failed to record fan-out receipt");
                }
            }
        }

        for batch in BatchDeliveryTarget::from_recipients(recipients) {
            let delivery = RemoteDelivery {
                sender: sender.clone(),
                activity: activity.clone(),
                inbox: batch.inbox.clone(),
                target_actor_ids: batch.target_actor_ids.clone(),
                is_shared: batch.is_shared,
            };

            match self.dispatch.queue_remote_delivery(delivery).await {
                Ok(()) => {
                    report.remote_batches += 1;
                    report.remote_recipients += batch.target_actor_ids.len();
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        activity_id = %activity.id,
                        inbox = %batch.inbox,
                        error = %e,
                        "Failed to queue remote delivery"
                    );
                    for target_id in &batch.target_actor_ids {
                        self.release(&idempotency_key(&activity.id, target_id))
                            .await;
                    }
                }
            }
        }
    }

    async fn release(&self, key: &str) {
        if let Err(e) = self.ledger.release(key).await {
            warn!(key = %key, error = %e, "Failed to release fan-out receipt");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Verb;
    use crate::services::dispatch::NotificationDispatch;
    use async_trait::async_trait;
    use chrono::Utc;
    use herald_db::repositories::{AudienceRepository, FanoutReceiptRepository};
    use herald_db::test_utils::TestDatabase;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatch {
        local: Mutex<Vec<LocalNotification>>,
        remote: Mutex<Vec<RemoteDelivery>>,
        fail_remote: bool,
    }

    #[async_trait]
    impl NotificationDispatch for RecordingDispatch {
        async fn queue_local_notification(&self, notification: LocalNotification) -> AppResult<()> {
            self.local.lock().unwrap().push(notification);
            Ok(())
        }

        async fn queue_remote_delivery(&self, delivery: RemoteDelivery) -> AppResult<()> {
            if self.fail_remote {
                return Err(AppError::Queue("backend unavailable".to_string()));
            }
            self.remote.lock().unwrap().push(delivery);
            Ok(())
        }
    }

    fn service(
        db: &TestDatabase,
        dispatch: Arc<RecordingDispatch>,
        policy: FanOutPolicy,
    ) -> FanOutService {
        FanOutService::new(
            Arc::new(AudienceRepository::new(db.connection())),
            Arc::new(FanoutReceiptRepository::new(db.connection())),
            dispatch,
            policy,
        )
    }

    fn post(id: &str, author: &str) -> Activity {
        Activity {
            id: id.to_string(),
            verb: Verb::Post,
            actor_id: author.to_string(),
            object_id: Some(format!("note-{id}")),
            object_uri: None,
            addressee_ids: vec![],
            group_ids: vec![],
            created_at: Utc::now(),
            content: Some("hello".to_string()),
        }
    }

    /// 3 local subscribers (one blocking the author) and 2 remote
    /// subscribers behind one shared inbox.
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

    #[tokio::test]
    async fn test_local_and_shared_inbox_scenario() {
        let db = TestDatabase::new().await.unwrap();
        let author = seed_scenario(&db).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let svc = service(&db, dispatch.clone(), FanOutPolicy::default());

        let report = svc
            .fan_out(&author, &post("act1", "author"), &[], None)
            .await
            .unwrap();

        assert_eq!(report.local_queued, 2);
        assert_eq!(report.remote_batches, 1);
        assert_eq!(report.remote_recipients, 2);
        assert_eq!(report.blocked, 1);

        let local = dispatch.local.lock().unwrap();
        let mut notified: Vec<&str> = local.iter().map(|n| n.notifiee_id.as_str()).collect();
        notified.sort_unstable();
        assert_eq!(notified, vec!["l1", "l2"]);
        assert!(local.iter().all(|n| n.reason == "subscriber"));

        let remote = dispatch.remote.lock().unwrap();
        assert_eq!(remote[0].inbox, "https://remote.example/inbox");
        assert!(remote[0].is_shared);
    }

    #[tokio::test]
    async fn test_rerun_dispatches_nothing_new() {
        let db = TestDatabase::new().await.unwrap();
        let author = seed_scenario(&db).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let svc = service(&db, dispatch.clone(), FanOutPolicy::default());
        let activity = post("act1", "author");

        svc.fan_out(&author, &activity, &[], None).await.unwrap();
        let second = svc.fan_out(&author, &activity, &[], None).await.unwrap();

        assert_eq!(second.local_queued, 0);
        assert_eq!(second.remote_batches, 0);
        assert_eq!(second.duplicates, 4);
        assert_eq!(dispatch.local.lock().unwrap().len(), 2);
        assert_eq!(dispatch.remote.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocking_remote_target_is_never_delivered() {
        let db = TestDatabase::new().await.unwrap();
        let author = seed_scenario(&db).await;
        db.block("r2", "author").await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let svc = service(&db, dispatch.clone(), FanOutPolicy::default());

        let report = svc
            .fan_out(&author, &post("act1", "author"), &[], None)
            .await
            .unwrap();

        assert_eq!(report.blocked, 2);
        let remote = dispatch.remote.lock().unwrap();
        assert_eq!(remote[0].target_actor_ids, vec!["r1"]);
        assert!(
            dispatch
                .local
                .lock()
                .unwrap()
                .iter()
                .all(|n| n.notifiee_id != "l3")
        );
    }

    #[tokio::test]
    async fn test_sender_excluded_unless_notify_self() {
        let db = TestDatabase::new().await.unwrap();
        let author = Actor::from(db.local_actor("author").await);
        let mut activity = post("act1", "author");
        activity.addressee_ids = vec!["author".to_string()];

        let dispatch = Arc::new(RecordingDispatch::default());
        let report = service(&db, dispatch.clone(), FanOutPolicy::default())
            .fan_out(&author, &activity, &[], None)
            .await
            .unwrap();
        assert_eq!(report.local_queued, 0);

        let dispatch = Arc::new(RecordingDispatch::default());
        let report = service(&db, dispatch.clone(), FanOutPolicy { notify_self: true })
            .fan_out(&author, &activity, &[], None)
            .await
            .unwrap();
        assert_eq!(report.local_queued, 1);
    }

    #[tokio::test]
    async fn test_addressee_reason_wins_and_already_known_skipped() {
        let db = TestDatabase::new().await.unwrap();
        let author = Actor::from(db.local_actor("author").await);
        db.local_actor("bob").await;
        db.local_actor("carol").await;
        db.subscribe("bob", "author").await;
        db.subscribe("carol", "author").await;
        let mut activity = post("act1", "author");
        activity.addressee_ids = vec!["bob".to_string()];

        let dispatch = Arc::new(RecordingDispatch::default());
        service(&db, dispatch.clone(), FanOutPolicy::default())
            .fan_out(&author, &activity, &["carol".to_string()], None)
            .await
            .unwrap();

        let local = dispatch.local.lock().unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].notifiee_id, "bob");
        assert_eq!(local[0].reason, "addressee");
        assert_eq!(local[0].idempotency_key, idempotency_key("act1", "bob"));
    }

    #[tokio::test]
    async fn test_failed_batch_releases_keys() {
        let db = TestDatabase::new().await.unwrap();
        let author = seed_scenario(&db).await;
        let failing = Arc::new(RecordingDispatch {
            fail_remote: true,
            ..RecordingDispatch::default()
        });

        let report = service(&db, failing, FanOutPolicy::default())
            .fan_out(&author, &post("act1", "author"), &[], None)
            .await
            .unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.local_queued, 2);

        // A later run picks up the remote recipients again.
        let dispatch = Arc::new(RecordingDispatch::default());
        let report = service(&db, dispatch.clone(), FanOutPolicy::default())
            .fan_out(&author, &post("act1", "author"), &[], None)
            .await
            .unwrap();
        assert_eq!(report.remote_batches, 1);
        assert_eq!(report.local_queued, 0);
    }

    #[tokio::test]
    async fn test_group_members_notified() {
        let db = TestDatabase::new().await.unwrap();
        let author = Actor::from(db.local_actor("author").await);
        db.actor(
            "group1",
            herald_db::entities::actor::ActorKind::Group,
            true,
            None,
            None,
        )
        .await;
        db.local_actor("member").await;
        db.join_group("group1", "member").await;
        let mut activity = post("act1", "author");
        activity.group_ids = vec!["group1".to_string()];

        let dispatch = Arc::new(RecordingDispatch::default());
        service(&db, dispatch.clone(), FanOutPolicy::default())
            .fan_out(&author, &activity, &[], Some("group_post"))
            .await
            .unwrap();

        let local = dispatch.local.lock().unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].notifiee_id, "member");
        assert_eq!(local[0].reason, "group_post");
    }

    #[tokio::test]
    async fn test_rejects_foreign_activity() {
        let db = TestDatabase::new().await.unwrap();
        let author = Actor::from(db.local_actor("author").await);
        let dispatch = Arc::new(RecordingDispatch::default());

        let err = service(&db, dispatch, FanOutPolicy::default())
            .fan_out(&author, &post("act1", "someone-else"), &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidPayload(_)));
    }
}
