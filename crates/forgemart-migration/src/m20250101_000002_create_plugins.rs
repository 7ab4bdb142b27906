use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Plugins::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Plugins::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Plugins::AuthorId).uuid().not_null())
                    .col(ColumnDef::new(Plugins::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Plugins::Description).text().not_null())
                    .col(ColumnDef::new(Plugins::Category).string_len(64).not_null())
                    .col(
                        ColumnDef::new(Plugins::Price)
                            .double()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Plugins::Features)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(ColumnDef::new(Plugins::Requirements).text().null())
                    .col(ColumnDef::new(Plugins::ThumbnailUrl).string_len(512).null())
                    .col(
                        ColumnDef::new(Plugins::AverageRating)
                            .double()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Plugins::DownloadCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Plugins::Featured)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Plugins::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Plugins::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_plugins_author_id")
                            .from(Plugins::Table, Plugins::AuthorId)
                            .to(Users::Table, Users::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Listing filters hit category and featured constantly
        manager
            .create_index(
                Index::create()
                    .name("idx_plugins_category")
                    .table(Plugins::Table)
                    .col(Plugins::Category)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_plugins_author_id")
                    .table(Plugins::Table)
                    .col(Plugins::AuthorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Plugins::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Plugins {
    Table,
    Id,
    AuthorId,
    Name,
    Description,
    Category,
    Price,
    Features,
    Requirements,
    ThumbnailUrl,
    AverageRating,
    DownloadCount,
    Featured,
    CreatedAt,
    UpdatedAt,
}
