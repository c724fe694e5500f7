//! Local notification job.

use herald_core::LocalNotification;

/// Job to write one notification row.
pub type NotifyJob = LocalNotification;
