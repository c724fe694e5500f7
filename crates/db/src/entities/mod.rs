//! Database entities.

#![allow(missing_docs)]

pub mod actor;
pub mod actor_keypair;
pub mod blocking;
pub mod dead_letter;
pub mod fanout_receipt;
pub mod group_member;
pub mod notification;
pub mod queue_item;
pub mod subscription;

pub use actor::Entity as Actor;
pub use actor_keypair::Entity as ActorKeypair;
pub use blocking::Entity as Blocking;
pub use dead_letter::Entity as DeadLetter;
pub use fanout_receipt::Entity as FanoutReceipt;
pub use group_member::Entity as GroupMember;
pub use notification::Entity as Notification;
pub use queue_item::Entity as QueueItem;
pub use subscription::Entity as Subscription;
