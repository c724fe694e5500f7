//! `ActivityStreams` rendering of fan-out activities.

use herald_common::{AppError, AppResult};
use herald_core::{Activity, Actor, Verb};
use serde_json::{Value, json};
use url::Url;

const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
const AS_PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Renders activities as `ActivityPub` JSON.
#[derive(Debug, Clone)]
pub struct ActivityRenderer {
    base_url: Url,
}

impl ActivityRenderer {
    /// Create a renderer for the instance at `base_url`.
    pub fn new(base_url: &str) -> AppResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("invalid instance url {base_url}: {e}")))?;
        Ok(Self { base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    fn activity_url(&self, activity: &Activity) -> String {
        self.url(&format!("activities/{}", activity.id))
    }

    fn object_url(&self, activity: &Activity) -> AppResult<String> {
        match (&activity.object_uri, &activity.object_id) {
            (Some(uri), _) => Ok(uri.clone()),
            (None, Some(id)) => Ok(self.url(&format!("notes/{id}"))),
            (None, None) => Err(AppError::InvalidPayload(format!(
                "{} activity {} has no object",
                activity.verb, activity.id
            ))),
        }
    }

    /// Render `activity` as sent by `sender`.
    pub fn render(&self, sender: &Actor, activity: &Activity) -> AppResult<Value> {
        let id = self.activity_url(activity);
        let actor = sender.uri.as_str();
        let followers = format!("{actor}/followers");
        let published = activity.created_at.to_rfc3339();

        let value = match activity.verb {
            Verb::Post | Verb::Reply | Verb::Update => {
                let note = self.render_note(sender, activity, &followers)?;
                let kind = if activity.verb == Verb::Update {
                    "Update"
                } else {
                    "Create"
                };
                json!({
                    "@context": AS_CONTEXT,
                    "id": id,
                    "type": kind,
                    "actor": actor,
                    "published": published,
                    "to": [AS_PUBLIC],
                    "cc": [followers],
                    "object": note,
                })
            }
            Verb::Delete => json!({
                "@context": AS_CONTEXT,
                "id": id,
                "type": "Delete",
                "actor": actor,
                "to": [AS_PUBLIC],
                "object": {
                    "id": self.object_url(activity)?,
                    "type": "Tombstone",
                },
            }),
            Verb::Like => json!({
                "@context": AS_CONTEXT,
                "id": id,
                "type": "Like",
                "actor": actor,
                "object": self.object_url(activity)?,
            }),
            Verb::Repeat => json!({
                "@context": AS_CONTEXT,
                "id": id,
                "type": "Announce",
                "actor": actor,
                "published": published,
                "to": [AS_PUBLIC],
                "cc": [followers],
                "object": self.object_url(activity)?,
            }),
            Verb::Follow => json!({
                "@context": AS_CONTEXT,
                "id": id,
                "type": "Follow",
                "actor": actor,
                "object": self.object_url(activity)?,
            }),
            // The object of an Undo is the activity being reverted.
            Verb::Undo => json!({
                "@context": AS_CONTEXT,
                "id": id,
                "type": "Undo",
                "actor": actor,
                "object": self.object_url(activity)?,
            }),
        };

        Ok(value)
    }

    fn render_note(&self, sender: &Actor, activity: &Activity, followers: &str) -> AppResult<Value> {
        let mut note = json!({
            "id": self.object_url(activity)?,
            "type": "Note",
            "attributedTo": sender.uri,
            "content": activity.content.as_deref().unwrap_or(""),
            "published": activity.created_at.to_rfc3339(),
            "to": [AS_PUBLIC],
            "cc": [followers],
        });

        if activity.verb == Verb::Update {
            note["updated"] = json!(activity.created_at.to_rfc3339());
        }

        Ok(note)
    }
}
