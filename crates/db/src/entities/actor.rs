//! Actor entity (local and remote identities).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Actor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ActorKind {
    #[sea_orm(string_value = "person")]
    Person,
    #[sea_orm(string_value = "group")]
    Group,
    #[sea_orm(string_value = "organization")]
    Organization,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "actor")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Canonical `ActivityPub` id.
    #[sea_orm(unique)]
    pub uri: String,

    pub kind: ActorKind,

    /// True for accounts hosted on this instance.
    pub is_local: bool,

    /// Personal inbox (remote actors).
    #[sea_orm(nullable)]
    pub inbox: Option<String>,

    /// Server-wide shared inbox (remote actors).
    #[sea_orm(nullable)]
    pub shared_inbox: Option<String>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
