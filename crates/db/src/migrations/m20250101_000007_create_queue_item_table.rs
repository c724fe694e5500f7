//! Create queue item table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(QueueItem::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(QueueItem::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(QueueItem::QueueName).string_len(64).not_null())
                    .col(ColumnDef::new(QueueItem::Payload).text().not_null())
                    .col(
                        ColumnDef::new(QueueItem::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(QueueItem::AvailableAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(QueueItem::ClaimedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(QueueItem::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: claim query scans unclaimed items of one queue in id order
        manager
            .create_index(
                Index::create()
                    .name("idx_queue_item_queue_claim")
                    .table(QueueItem::Table)
                    .col(QueueItem::QueueName)
                    .col(QueueItem::ClaimedAt)
                    .col(QueueItem::Id)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(QueueItem::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum QueueItem {
    Table,
    Id,
    QueueName,
    Payload,
    Attempts,
    AvailableAt,
    ClaimedAt,
    CreatedAt,
}
