//! Create fan-out receipt table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(FanoutReceipt::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FanoutReceipt::Key)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(FanoutReceipt::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: created_at (retention pruning)
        manager
            .create_index(
                Index::create()
                    .name("idx_fanout_receipt_created_at")
                    .table(FanoutReceipt::Table)
                    .col(FanoutReceipt::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(FanoutReceipt::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum FanoutReceipt {
    Table,
    Key,
    CreatedAt,
}
