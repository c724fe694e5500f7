//! Queue item entity (database queue backend).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "queue_item")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Logical queue name
    pub queue_name: String,

    /// JSON payload
    #[sea_orm(column_type = "Text")]
    pub payload: String,

    /// Claims so far, including the current one
    pub attempts: i32,

    /// Not handed out before this instant (retry backoff)
    pub available_at: DateTimeWithTimeZone,

    /// Set while a worker holds the item
    #[sea_orm(nullable)]
    pub claimed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
