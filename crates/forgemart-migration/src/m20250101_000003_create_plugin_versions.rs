use sea_orm_migration::prelude::*;

use super::m20250101_000002_create_plugins::Plugins;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PluginVersions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PluginVersions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PluginVersions::PluginId).uuid().not_null())
                    .col(
                        ColumnDef::new(PluginVersions::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PluginVersions::VersionNumber)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PluginVersions::FilePath)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PluginVersions::MinecraftVersion)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PluginVersions::Changelog).text().null())
                    .col(
                        ColumnDef::new(PluginVersions::ReleaseDate)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PluginVersions::DownloadCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PluginVersions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_plugin_versions_plugin_id")
                            .from(PluginVersions::Table, PluginVersions::PluginId)
                            .to(Plugins::Table, Plugins::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Append order within a plugin must be unambiguous: the row with
        // the greatest position is the downloadable "latest" version.
        manager
            .create_index(
                Index::create()
                    .name("uq_plugin_versions_plugin_position")
                    .table(PluginVersions::Table)
                    .col(PluginVersions::PluginId)
                    .col(PluginVersions::Position)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PluginVersions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum PluginVersions {
    Table,
    Id,
    PluginId,
    Position,
    VersionNumber,
    FilePath,
    MinecraftVersion,
    Changelog,
    ReleaseDate,
    DownloadCount,
    CreatedAt,
}
