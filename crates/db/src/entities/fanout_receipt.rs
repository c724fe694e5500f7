//! Fan-out receipt entity (idempotency keys already dispatched).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fanout_receipt")]
pub struct Model {
    /// `{activity_id}:{target_actor_id}`
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
