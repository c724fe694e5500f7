//! Job dispatch seam.
//!
//! The fan-out engine hands work to a [`NotificationDispatch`] without
//! knowing which queue backend is configured. The queue crate provides the
//! real implementation.

use async_trait::async_trait;
use herald_common::AppResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{Activity, Actor};

/// One in-app notification to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalNotification {
    /// Receiving local actor.
    pub notifiee_id: String,
    /// Author of the activity.
    pub notifier_id: String,
    /// Activity id.
    pub activity_id: String,
    /// Activity verb name.
    pub verb: String,
    /// Why the notifiee was targeted.
    pub reason: String,
    /// `{activity_id}:{notifiee_id}`.
    pub idempotency_key: String,
}

/// One push to a remote inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDelivery {
    /// Author of the activity.
    pub sender: Actor,
    /// The activity to deliver.
    pub activity: Activity,
    /// Destination inbox.
    pub inbox: String,
    /// Remote actors served by this push.
    pub target_actor_ids: Vec<String>,
    /// Whether `inbox` is a shared inbox.
    pub is_shared: bool,
}

/// Hands fan-out results to the job queue.
#[async_trait]
pub trait NotificationDispatch: Send + Sync {
    /// Queue a local notification job.
    async fn queue_local_notification(&self, notification: LocalNotification) -> AppResult<()>;

    /// Queue a remote delivery job.
    async fn queue_remote_delivery(&self, delivery: RemoteDelivery) -> AppResult<()>;
}

/// Dispatch that drops everything, for deployments with notifications and
/// federation disabled.
#[derive(Clone, Default)]
pub struct NoOpDispatch;

#[async_trait]
impl NotificationDispatch for NoOpDispatch {
    async fn queue_local_notification(&self, _notification: LocalNotification) -> AppResult<()> {
        Ok(())
    }

    async fn queue_remote_delivery(&self, _delivery: RemoteDelivery) -> AppResult<()> {
        Ok(())
    }
}

/// Shared dispatch handle.
pub type DispatchService = Arc<dyn NotificationDispatch>;
