//! Subscription entity (actor follows actor).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscription")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// The following actor
    pub subscriber_id: String,

    /// The actor being followed
    pub subscribed_id: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::actor::Entity",
        from = "Column::SubscriberId",
        to = "super::actor::Column::Id",
        on_delete = "Cascade"
    )]
    Subscriber,

    #[sea_orm(
        belongs_to = "super::actor::Entity",
        from = "Column::SubscribedId",
        to = "super::actor::Column::Id",
        on_delete = "Cascade"
    )]
    Subscribed,
}

impl ActiveModelBehavior for ActiveModel {}
