//! Per-activity target set.

use std::collections::HashMap;

use crate::model::Actor;

/// Why an actor is being notified.
///
/// When an actor qualifies for several reasons the strongest one is kept:
/// addressee, then group member, then subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetReason {
    /// Mentioned, or the author of the object replied to.
    Addressee,
    /// Member of a group the activity targets.
    GroupMember,
    /// Subscribed to the author.
    Subscriber,
}

impl TargetReason {
    const fn rank(self) -> u8 {
        match self {
            Self::Addressee => 0,
            Self::GroupMember => 1,
            Self::Subscriber => 2,
        }
    }

    /// Name stored on notification rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Addressee => "addressee",
            Self::GroupMember => "group_member",
            Self::Subscriber => "subscriber",
        }
    }
}

/// One actor to notify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The actor.
    pub actor: Actor,
    /// Strongest reason it was included.
    pub reason: TargetReason,
}

/// Deduplicated, insertion-ordered set of targets keyed by actor id.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    order: Vec<String>,
    targets: HashMap<String, Target>,
}

impl TargetSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an actor. Returns true if it was not present yet.
    ///
    /// A repeated actor keeps its position and the stronger of the two
    /// reasons.
    pub fn insert(&mut self, actor: Actor, reason: TargetReason) -> bool {
        if let Some(existing) = self.targets.get_mut(&actor.id) {
            if reason.rank() < existing.reason.rank() {
                existing.reason = reason;
            }
            return false;
        }

        self.order.push(actor.id.clone());
        self.targets.insert(actor.id.clone(), Target { actor, reason });
        true
    }

    /// Remove an actor by id.
    pub fn remove(&mut self, actor_id: &str) -> Option<Target> {
        let removed = self.targets.remove(actor_id)?;
        self.order.retain(|id| id != actor_id);
        Some(removed)
    }

    /// Whether an actor id is present.
    #[must_use]
    pub fn contains(&self, actor_id: &str) -> bool {
        self.targets.contains_key(actor_id)
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.order.iter().filter_map(|id| self.targets.get(id))
    }

    /// Split into (local, remote) targets, preserving order.
    #[must_use]
    pub fn partition_local(mut self) -> (Vec<Target>, Vec<Target>) {
        self.order
            .iter()
            .filter_map(|id| self.targets.remove(id))
            .partition(|t| t.actor.is_local)
    }
}
