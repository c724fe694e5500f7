//! Job payloads of the standard queues.

mod deliver;
mod notify;

pub use deliver::DeliverJob;
pub use notify::NotifyJob;

/// Queue carrying local notification rows.
pub const NOTIFICATION_QUEUE: &str = "notification";

/// Queue carrying remote inbox pushes.
pub const FEDERATION_QUEUE: &str = "federation";
