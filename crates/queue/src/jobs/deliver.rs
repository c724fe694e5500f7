//! `ActivityPub` delivery job.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job to deliver an activity to a remote inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverJob {
    /// Local actor whose key signs the request.
    pub sender_id: String,

    /// Activity id, for logs.
    pub activity_id: String,

    /// Target inbox URL.
    pub inbox: String,

    /// Remote actors served by this push.
    #[serde(default)]
    pub target_actor_ids: Vec<String>,

    /// Activity JSON to deliver.
    pub activity: Value,
}

impl DeliverJob {
    /// Host part of the inbox URL, used for rate limiting.
    #[must_use]
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.inbox)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}
