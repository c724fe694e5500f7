//! Notification fan-out for herald.
//!
//! Turns one activity into local notification jobs and batched remote
//! delivery jobs. Storage and transport sit behind the traits in
//! [`services`].

pub mod model;
pub mod services;
pub mod shared_inbox;
pub mod targets;

pub use model::{Activity, Actor, ActorKind, Verb};
pub use services::*;
pub use targets::{Target, TargetReason, TargetSet};

/// Idempotency key for one (activity, target actor) pair.
///
/// The activity id is length-prefixed, so ids containing `:` cannot make
/// two pairs share a key.
#[must_use]
pub fn idempotency_key(activity_id: &str, target_actor_id: &str) -> String {
    format!("{}:{activity_id}:{target_actor_id}", activity_id.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_shape() {
        assert_eq!(idempotency_key("act1", "bob"), "4:act1:bob");
    }

    #[test]
    fn test_colons_in_ids_do_not_collide() {
        assert_ne!(idempotency_key("a:b", "c"), idempotency_key("a", "b:c"));
        assert_ne!(
            idempotency_key("https://remote.example/activities/1", "https://local.example/users/bob"),
            idempotency_key("https://remote.example/activities/1:https", "//local.example/users/bob"),
        );
    }
}
