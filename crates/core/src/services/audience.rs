//! Audience snapshot seam.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use herald_common::AppResult;
use herald_db::repositories::AudienceRepository;

use crate::model::{Activity, Actor};

/// Everyone an activity could reach, read at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Audience {
    /// Explicit addressees.
    pub addressee_ids: Vec<String>,
    /// The author's subscribers.
    pub subscriber_ids: Vec<String>,
    /// Members of targeted groups.
    pub group_member_ids: Vec<String>,
    /// Candidates that have blocked the author.
    pub blocker_ids: HashSet<String>,
    /// Actor records by id.
    pub actors: HashMap<String, Actor>,
}

impl Audience {
    /// Look up a candidate.
    #[must_use]
    pub fn actor(&self, id: &str) -> Option<&Actor> {
        self.actors.get(id)
    }

    /// Whether `id` has blocked the author.
    #[must_use]
    pub fn has_blocked_author(&self, id: &str) -> bool {
        self.blocker_ids.contains(id)
    }
}

/// Source of audience snapshots.
///
/// Implementations must complete all reads before returning so that no
/// dispatch observes a partially read actor graph.
#[async_trait]
pub trait AudienceSource: Send + Sync {
    /// Read the audience of `activity`.
    async fn snapshot(&self, activity: &Activity) -> AppResult<Audience>;
}

#[async_trait]
impl AudienceSource for AudienceRepository {
    async fn snapshot(&self, activity: &Activity) -> AppResult<Audience> {
        let rows = Self::snapshot(
            self,
            &activity.actor_id,
            &activity.addressee_ids,
            &activity.group_ids,
        )
        .await?;

        Ok(Audience {
            addressee_ids: rows.addressee_ids,
            subscriber_ids: rows.subscriber_ids,
            group_member_ids: rows.group_member_ids,
            blocker_ids: rows.blocker_ids.into_iter().collect(),
            actors: rows
                .actors
                .into_iter()
                .map(|a| (a.id.clone(), Actor::from(a)))
                .collect(),
        })
    }
}
