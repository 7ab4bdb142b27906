use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_users::Users;
use super::m20250101_000002_create_plugins::Plugins;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Purchases::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Purchases::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Purchases::UserId).uuid().not_null())
                    .col(ColumnDef::new(Purchases::PluginId).uuid().not_null())
                    .col(ColumnDef::new(Purchases::Price).double().not_null())
                    .col(
                        ColumnDef::new(Purchases::TransactionId)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Purchases::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchases_user_id")
                            .from(Purchases::Table, Purchases::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchases_plugin_id")
                            .from(Purchases::Table, Purchases::PluginId)
                            .to(Plugins::Table, Plugins::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // The duplicate-purchase check in the service layer is advisory;
        // this constraint is what actually guarantees one ledger entry
        // per (user, plugin) under concurrent requests.
        manager
            .create_index(
                Index::create()
                    .name("uq_purchases_user_plugin")
                    .table(Purchases::Table)
                    .col(Purchases::UserId)
                    .col(Purchases::PluginId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Purchases::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Purchases {
    Table,
    Id,
    UserId,
    PluginId,
    Price,
    TransactionId,
    CreatedAt,
}
