//! Activities and actors as seen by the fan-out engine.

use chrono::{DateTime, Utc};
use herald_db::entities::actor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an activity does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// New top-level post.
    Post,
    /// Reply to another object.
    Reply,
    /// Like / favourite.
    Like,
    /// Repeat / boost.
    Repeat,
    /// Subscription request.
    Follow,
    /// Edit of an earlier object.
    Update,
    /// Removal of an earlier object.
    Delete,
    /// Reversal of an earlier activity.
    Undo,
}

impl Verb {
    /// Lowercase name, as stored on notification rows.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Reply => "reply",
            Self::Like => "like",
            Self::Repeat => "repeat",
            Self::Follow => "follow",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Undo => "undo",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded action by an actor.
///
/// Immutable once fan-out starts; an edit is a new activity with
/// [`Verb::Update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity id.
    pub id: String,
    /// What happened.
    pub verb: Verb,
    /// Author.
    pub actor_id: String,
    /// Local id of the object acted on.
    #[serde(default)]
    pub object_id: Option<String>,
    /// Canonical URI of the object acted on.
    #[serde(default)]
    pub object_uri: Option<String>,
    /// Mentioned actors and the reply-to author.
    #[serde(default)]
    pub addressee_ids: Vec<String>,
    /// Groups the activity is addressed to.
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Text content, if any.
    #[serde(default)]
    pub content: Option<String>,
}

/// Actor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    /// An individual account.
    Person,
    /// A group that redistributes to its members.
    Group,
    /// An organization account.
    Organization,
}

/// A local or remote identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Actor id.
    pub id: String,
    /// Canonical `ActivityPub` id.
    pub uri: String,
    /// Kind of account.
    pub kind: ActorKind,
    /// Hosted on this instance.
    pub is_local: bool,
    /// Personal inbox.
    pub inbox: Option<String>,
    /// Server-wide shared inbox.
    pub shared_inbox: Option<String>,
}

impl Actor {
    /// Whether this actor is a group.
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self.kind, ActorKind::Group)
    }
}

impl From<actor::ActorKind> for ActorKind {
    fn from(kind: actor::ActorKind) -> Self {
        match kind {
            actor::ActorKind::Person => Self::Person,
            actor::ActorKind::Group => Self::Group,
            actor::ActorKind::Organization => Self::Organization,
        }
    }
}

impl From<actor::Model> for Actor {
    fn from(model: actor::Model) -> Self {
        Self {
            id: model.id,
            uri: model.uri,
            kind: model.kind.into(),
            is_local: model.is_local,
            inbox: model.inbox,
            shared_inbox: model.shared_inbox,
        }
    }
}
