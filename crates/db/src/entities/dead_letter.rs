//! Dead letter entity (jobs removed from retry).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Id the job had while queued
    pub job_id: String,

    pub queue_name: String,

    #[sea_orm(column_type = "Text")]
    pub payload: String,

    pub attempts: i32,

    #[sea_orm(column_type = "Text")]
    pub last_error: String,

    pub enqueued_at: DateTimeWithTimeZone,

    pub failed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
