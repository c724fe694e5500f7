//! Create actor table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Actor::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Actor::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Actor::Uri).string_len(512).not_null().unique_key())
                    .col(ColumnDef::new(Actor::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(Actor::IsLocal).boolean().not_null())
                    .col(ColumnDef::new(Actor::Inbox).string_len(512))
                    .col(ColumnDef::new(Actor::SharedInbox).string_len(512))
                    .col(
                        ColumnDef::new(Actor::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Actor::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Actor {
    Table,
    Id,
    Uri,
    Kind,
    IsLocal,
    Inbox,
    SharedInbox,
    CreatedAt,
}
