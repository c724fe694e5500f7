//! Create group_member table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GroupMember::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(GroupMember::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(GroupMember::GroupId).string_len(32).not_null())
                    .col(ColumnDef::new(GroupMember::MemberId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(GroupMember::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_group_member_group_id")
                            .from(GroupMember::Table, GroupMember::GroupId)
                            .to(Actor::Table, Actor::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_group_member_member_id")
                            .from(GroupMember::Table, GroupMember::MemberId)
                            .to(Actor::Table, Actor::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: one membership per pair
        manager
            .create_index(
                Index::create()
                    .name("idx_group_member_group_id_member_id")
                    .table(GroupMember::Table)
                    .col(GroupMember::GroupId)
                    .col(GroupMember::MemberId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: member_id (groups an actor belongs to)
        manager
            .create_index(
                Index::create()
                    .name("idx_group_member_member_id")
                    .table(GroupMember::Table)
                    .col(GroupMember::MemberId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(GroupMember::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum GroupMember {
    Table,
    Id,
    GroupId,
    MemberId,
    CreatedAt,
}

#[derive(Iden)]
enum Actor {
    Table,
    Id,
}
