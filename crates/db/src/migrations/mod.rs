//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_actor_table;
mod m20250101_000002_create_subscription_table;
mod m20250101_000003_create_blocking_table;
mod m20250101_000004_create_group_member_table;
mod m20250101_000005_create_actor_keypair_table;
mod m20250101_000006_create_notification_table;
mod m20250101_000007_create_queue_item_table;
mod m20250101_000008_create_dead_letter_table;
mod m20250101_000009_create_fanout_receipt_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_actor_table::Migration),
            Box::new(m20250101_000002_create_subscription_table::Migration),
            Box::new(m20250101_000003_create_blocking_table::Migration),
            Box::new(m20250101_000004_create_group_member_table::Migration),
            Box::new(m20250101_000005_create_actor_keypair_table::Migration),
            Box::new(m20250101_000006_create_notification_table::Migration),
            Box::new(m20250101_000007_create_queue_item_table::Migration),
            Box::new(m20250101_000008_create_dead_letter_table::Migration),
            Box::new(m20250101_000009_create_fanout_receipt_table::Migration),
        ]
    }
}
