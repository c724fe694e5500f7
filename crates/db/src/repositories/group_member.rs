//! Group member repository.

use std::sync::Arc;

use crate::entities::{GroupMember, group_member};
use herald_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
};

/// Group member repository for database operations.
#[derive(Clone)]
pub struct GroupMemberRepository {
    db: Arc<DatabaseConnection>,
}

impl GroupMemberRepository {
    /// Create a new group member repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Member IDs of the given groups.
    pub async fn find_member_ids(&self, group_ids: &[String]) -> AppResult<Vec<String>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        GroupMember::find()
            .select_only()
            .column(group_member::Column::MemberId)
            .filter(group_member::Column::GroupId.is_in(group_ids.iter().cloned()))
            .into_tuple()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Add a member to a group.
    pub async fn create(
        &self,
        model: group_member::ActiveModel,
    ) -> AppResult<group_member::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
