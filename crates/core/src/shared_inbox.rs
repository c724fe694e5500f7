//! Shared inbox batching for remote delivery.
//!
//! Remote actors on the same server usually advertise one shared inbox, so
//! one push can serve all of them.

use std::collections::BTreeMap;

use crate::model::Actor;

/// A remote actor that can receive deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientInfo {
    /// Actor id.
    pub actor_id: String,
    /// Actor URI.
    pub actor_uri: String,
    /// Personal inbox URL.
    pub inbox: String,
    /// Server shared inbox URL, if any.
    pub shared_inbox: Option<String>,
}

impl RecipientInfo {
    /// Build from an actor. Returns `None` when the actor has no inbox at all.
    #[must_use]
    pub fn from_actor(actor: &Actor) -> Option<Self> {
        let inbox = actor.inbox.clone().or_else(|| actor.shared_inbox.clone())?;
        Some(Self {
            actor_id: actor.id.clone(),
            actor_uri: actor.uri.clone(),
            inbox,
            shared_inbox: actor.shared_inbox.clone(),
        })
    }

    /// Inbox to deliver to; the shared inbox when available.
    #[must_use]
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox.as_deref().unwrap_or(&self.inbox)
    }
}

/// Group recipients by delivery inbox, ordered by inbox URL.
#[must_use]
pub fn group_by_shared_inbox(
    recipients: Vec<RecipientInfo>,
) -> BTreeMap<String, Vec<RecipientInfo>> {
    let mut groups: BTreeMap<String, Vec<RecipientInfo>> = BTreeMap::new();

    for recipient in recipients {
        groups
            .entry(recipient.delivery_inbox().to_string())
            .or_default()
            .push(recipient);
    }

    groups
}

/// One delivery job's worth of recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDeliveryTarget {
    /// Inbox URL to push to.
    pub inbox: String,
    /// Actor ids served by this push.
    pub target_actor_ids: Vec<String>,
    /// Whether `inbox` is a shared inbox.
    pub is_shared: bool,
}

impl BatchDeliveryTarget {
    /// Batch recipients by shared inbox.
    #[must_use]
    pub fn from_recipients(recipients: Vec<RecipientInfo>) -> Vec<Self> {
        group_by_shared_inbox(recipients)
            .into_iter()
            .map(|(inbox, group)| {
                let is_shared = group.first().is_some_and(|r| r.shared_inbox.is_some());
                Self {
                    inbox,
                    target_actor_ids: group.into_iter().map(|r| r.actor_id).collect(),
                    is_shared,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient(id: &str, host: &str, shared: bool) -> RecipientInfo {
        RecipientInfo {
            actor_id: id.to_string(),
            actor_uri: format!("https://{host}/users/{id}"),
            inbox: format!("https://{host}/users/{id}/inbox"),
            shared_inbox: shared.then(|| format!("https://{host}/inbox")),
        }
    }

    #[test]
    fn test_group_by_shared_inbox() {
        let groups = group_by_shared_inbox(vec![
            recipient("alice", "example.com", true),
            recipient("bob", "example.com", true),
            recipient("charlie", "other.com", false),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["https://example.com/inbox"].len(), 2);
        assert_eq!(groups["https://other.com/users/charlie/inbox"].len(), 1);
    }

    #[test]
    fn test_batch_delivery_target() {
        let targets = BatchDeliveryTarget::from_recipients(vec![
            recipient("alice", "example.com", true),
            recipient("bob", "example.com", true),
        ]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].inbox, "https://example.com/inbox");
        assert_eq!(targets[0].target_actor_ids, vec!["alice", "bob"]);
        assert!(targets[0].is_shared);
    }

    #[test]
    fn test_actor_without_inbox() {
        let actor = Actor {
            id: "x".to_string(),
            uri: "https://example.com/users/x".to_string(),
            kind: crate::model::ActorKind::Person,
            is_local: false,
            inbox: None,
            shared_inbox: None,
        };
        assert!(RecipientInfo::from_actor(&actor).is_none());
    }
}
