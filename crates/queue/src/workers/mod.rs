//! Handlers for the standard queues.

mod deliver;
mod notification;

pub use deliver::DeliverWorker;
pub use notification::NotificationWorker;
