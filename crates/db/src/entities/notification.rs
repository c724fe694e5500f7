//! Notification entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notification")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The actor receiving the notification
    pub notifiee_id: String,

    /// The actor whose activity triggered it
    pub notifier_id: String,

    /// The activity being notified about
    pub activity_id: String,

    /// Activity verb (post, like, repeat, ...)
    pub verb: String,

    /// Why the notifiee was targeted (mention, subscription, group, ...)
    pub reason: String,

    /// `{activity_id}:{notifiee_id}`; one row per pair.
    #[sea_orm(unique)]
    pub idempotency_key: String,

    /// Has this notification been read?
    #[sea_orm(default_value = false)]
    pub is_read: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::actor::Entity",
        from = "Column::NotifieeId",
        to = "super::actor::Column::Id",
        on_delete = "Cascade"
    )]
    Notifiee,
}

impl ActiveModelBehavior for ActiveModel {}
