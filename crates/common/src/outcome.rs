//! Result of a single job attempt.

use std::fmt;
use std::time::Duration;

/// What happened when a handler processed one job.
///
/// Handlers return this instead of raising errors; the queue manager acks,
/// requeues or dead-letters based on the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The job is done and can be acknowledged.
    Delivered,
    /// The attempt failed for a reason that may clear up (network, 5xx, 429).
    Retryable {
        /// Human readable failure description.
        reason: String,
        /// Delay requested by the remote side, overriding the backoff schedule.
        retry_after: Option<Duration>,
    },
    /// The job can never succeed (unknown target, malformed payload, 4xx).
    Permanent {
        /// Human readable failure description.
        reason: String,
    },
    /// The job was not attempted and should run again after `retry_after`.
    ///
    /// Does not count against the attempt limit.
    Deferred {
        /// Time to wait before handing the job out again.
        retry_after: Duration,
    },
}

impl DeliveryOutcome {
    /// Retryable failure without a server-supplied delay.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable {
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// Permanent failure.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent {
            reason: reason.into(),
        }
    }

    /// Classify an HTTP response status from a remote inbox.
    ///
    /// 2xx succeeds, 429 and 5xx are retryable, every other status is terminal.
    #[must_use]
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            200..=299 => Self::Delivered,
            429 => Self::Retryable {
                reason: "remote rate limited (429)".to_string(),
                retry_after,
            },
            500..=599 => Self::Retryable {
                reason: format!("remote server error ({status})"),
                retry_after,
            },
            _ => Self::Permanent {
                reason: format!("remote rejected delivery ({status})"),
            },
        }
    }

    /// Whether the job succeeded.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// Failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Delivered | Self::Deferred { .. } => None,
            Self::Retryable { reason, .. } | Self::Permanent { reason } => Some(reason),
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Retryable { reason, .. } => write!(f, "retryable: {reason}"),
            Self::Permanent { reason } => write!(f, "permanent: {reason}"),
            Self::Deferred { retry_after } => write!(f, "deferred for {retry_after:?}"),
        }
    }
}
