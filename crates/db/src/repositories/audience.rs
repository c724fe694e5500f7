//! Audience snapshot for notification fan-out.
//!
//! Reads every relationship a fan-out needs inside one transaction. On
//! PostgreSQL the transaction is read-only with repeatable-read isolation so
//! the result is a consistent snapshot of the actor graph.

use std::collections::HashSet;
use std::sync::Arc;

use crate::entities::{
    Actor, Blocking, GroupMember, Subscription, actor, blocking, group_member, subscription,
};
use herald_common::{AppError, AppResult};
use sea_orm::{
    AccessMode, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    EntityTrait, IsolationLevel, QueryFilter, QuerySelect, TransactionTrait,
};

/// Relationships relevant to one activity, read at one point in time.
#[derive(Debug, Clone, Default)]
pub struct AudienceRows {
    /// Explicit addressees that exist.
    pub addressee_ids: Vec<String>,
    /// Actors subscribed to the author.
    pub subscriber_ids: Vec<String>,
    /// Members of the targeted groups.
    pub group_member_ids: Vec<String>,
    /// Candidates that have blocked the author.
    pub blocker_ids: Vec<String>,
    /// Actor rows for every candidate above.
    pub actors: Vec<actor::Model>,
}

/// Audience repository.
#[derive(Clone)]
pub struct AudienceRepository {
    db: Arc<DatabaseConnection>,
}

impl AudienceRepository {
    /// Create a new audience repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Read the audience of an activity by `author_id`.
    pub async fn snapshot(
        &self,
        author_id: &str,
        addressee_ids: &[String],
        group_ids: &[String],
    ) -> AppResult<AudienceRows> {
        let txn = self.begin_snapshot().await?;
        // Dropping the transaction on error rolls it back.
        let rows = read_audience(&txn, author_id, addressee_ids, group_ids).await?;
        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(rows)
    }

    async fn begin_snapshot(&self) -> AppResult<DatabaseTransaction> {
        let result = match self.db.get_database_backend() {
            DbBackend::Postgres => {
                self.db
                    .begin_with_config(
                        Some(IsolationLevel::RepeatableRead),
                        Some(AccessMode::ReadOnly),
                    )
                    .await
            }
            _ => self.db.begin().await,
        };
        result.map_err(|e| AppError::Database(e.to_string()))
    }
}

async fn read_audience(
    txn: &DatabaseTransaction,
    author_id: &str,
    addressee_ids: &[String],
    group_ids: &[String],
) -> AppResult<AudienceRows> {
    let subscriber_ids: Vec<String> = Subscription::find()
        .select_only()
        .column(subscription::Column::SubscriberId)
        .filter(subscription::Column::SubscribedId.eq(author_id))
        .into_tuple()
        .all(txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    let group_member_ids: Vec<String> = if group_ids.is_empty() {
        vec![]
    } else {
        GroupMember::find()
            .select_only()
            .column(group_member::Column::MemberId)
            .filter(group_member::Column::GroupId.is_in(group_ids.iter().cloned()))
            .into_tuple()
            .all(txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
    };

    let mut candidates: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for id in addressee_ids
        .iter()
        .chain(&subscriber_ids)
        .chain(&group_member_ids)
    {
        if seen.insert(id.as_str()) {
            candidates.push(id.clone());
        }
    }

    if candidates.is_empty() {
        return Ok(AudienceRows::default());
    }

    let actors = Actor::find()
        .filter(actor::Column::Id.is_in(candidates.iter().cloned()))
        .all(txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    let blocker_ids: Vec<String> = Blocking::find()
        .select_only()
        .column(blocking::Column::BlockerId)
        .filter(blocking::Column::BlockeeId.eq(author_id))
        .filter(blocking::Column::BlockerId.is_in(candidates.iter().cloned()))
        .into_tuple()
        .all(txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

    let known: HashSet<&str> = actors.iter().map(|a| a.id.as_str()).collect();
    let addressee_ids = addressee_ids
        .iter()
        .filter(|id| known.contains(id.as_str()))
        .cloned()
        .collect();

    Ok(AudienceRows {
        addressee_ids,
        subscriber_ids,
        group_member_ids,
        blocker_ids,
        actors,
    })
}
