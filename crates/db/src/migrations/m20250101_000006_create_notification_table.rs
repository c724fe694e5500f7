//! Create notification table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Notification::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Notification::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Notification::NotifieeId).string_len(32).not_null())
                    .col(ColumnDef::new(Notification::NotifierId).string_len(32).not_null())
                    .col(ColumnDef::new(Notification::ActivityId).string_len(64).not_null())
                    .col(ColumnDef::new(Notification::Verb).string_len(16).not_null())
                    .col(ColumnDef::new(Notification::Reason).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Notification::IdempotencyKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Notification::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Notification::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_notification_notifiee")
                            .from(Notification::Table, Notification::NotifieeId)
                            .to(Actor::Table, Actor::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: the insert relies on ON CONFLICT against this key
        manager
            .create_index(
                Index::create()
                    .name("idx_notification_idempotency_key")
                    .table(Notification::Table)
                    .col(Notification::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: notifiee_id (listing a user's notifications)
        manager
            .create_index(
                Index::create()
                    .name("idx_notification_notifiee_id")
                    .table(Notification::Table)
                    .col(Notification::NotifieeId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Notification::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Notification {
    Table,
    Id,
    NotifieeId,
    NotifierId,
    ActivityId,
    Verb,
    Reason,
    IdempotencyKey,
    IsRead,
    CreatedAt,
}

#[derive(Iden)]
enum Actor {
    Table,
    Id,
}
