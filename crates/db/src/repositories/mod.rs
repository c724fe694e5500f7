//! Database repositories.

pub mod actor;
pub mod actor_keypair;
pub mod audience;
pub mod blocking;
pub mod dead_letter;
pub mod fanout_receipt;
pub mod group_member;
pub mod notification;
pub mod queue_item;
pub mod subscription;

pub use actor::ActorRepository;
pub use actor_keypair::ActorKeypairRepository;
pub use audience::{AudienceRepository, AudienceRows};
pub use blocking::BlockingRepository;
pub use dead_letter::DeadLetterRepository;
pub use fanout_receipt::FanoutReceiptRepository;
pub use group_member::GroupMemberRepository;
pub use notification::{NewNotification, NotificationInsert, NotificationRepository};
pub use queue_item::QueueItemRepository;
pub use subscription::SubscriptionRepository;
