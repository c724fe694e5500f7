//! Create subscription table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Subscription::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Subscription::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Subscription::SubscriberId).string_len(32).not_null())
                    .col(ColumnDef::new(Subscription::SubscribedId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Subscription::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscription_subscriber_id")
                            .from(Subscription::Table, Subscription::SubscriberId)
                            .to(Actor::Table, Actor::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscription_subscribed_id")
                            .from(Subscription::Table, Subscription::SubscribedId)
                            .to(Actor::Table, Actor::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: one subscription per pair
        manager
            .create_index(
                Index::create()
                    .name("idx_subscription_subscriber_id_subscribed_id")
                    .table(Subscription::Table)
                    .col(Subscription::SubscriberId)
                    .col(Subscription::SubscribedId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: subscribed_id (fan-out reads followers of the sender)
        manager
            .create_index(
                Index::create()
                    .name("idx_subscription_subscribed_id")
                    .table(Subscription::Table)
                    .col(Subscription::SubscribedId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Subscription::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Subscription {
    Table,
    Id,
    SubscriberId,
    SubscribedId,
    CreatedAt,
}

#[derive(Iden)]
enum Actor {
    Table,
    Id,
}
