//! Fan-out services and the seams they depend on.

pub mod audience;
pub mod bus;
pub mod dispatch;
pub mod fanout;
pub mod receipt;

pub use audience::{Audience, AudienceSource};
pub use bus::{ActivityBus, ActivityCreated, ActivityPublisher};
pub use dispatch::{
    DispatchService, LocalNotification, NoOpDispatch, NotificationDispatch, RemoteDelivery,
};
pub use fanout::{FanOutPolicy, FanOutReport, FanOutService};
pub use receipt::ReceiptLedger;
