//! Create dead letter table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DeadLetter::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeadLetter::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(DeadLetter::JobId).string_len(64).not_null())
                    .col(ColumnDef::new(DeadLetter::QueueName).string_len(64).not_null())
                    .col(ColumnDef::new(DeadLetter::Payload).text().not_null())
                    .col(ColumnDef::new(DeadLetter::Attempts).integer().not_null())
                    .col(ColumnDef::new(DeadLetter::LastError).text().not_null())
                    .col(
                        ColumnDef::new(DeadLetter::EnqueuedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DeadLetter::FailedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dead_letter_queue_name")
                    .table(DeadLetter::Table)
                    .col(DeadLetter::QueueName)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeadLetter::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum DeadLetter {
    Table,
    Id,
    JobId,
    QueueName,
    Payload,
    Attempts,
    LastError,
    EnqueuedAt,
    FailedAt,
}
