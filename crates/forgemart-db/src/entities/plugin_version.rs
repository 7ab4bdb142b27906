use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One released binary of a plugin. Rows are append-only: `position` is
/// the append index within the plugin, and the row with the greatest
/// position is the "latest" version served to downloaders.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plugin_versions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub plugin_id: Uuid,
    pub position: i32,
    pub version_number: String,
    /// Relative path of the archive in the artifact store
    pub file_path: String,
    pub minecraft_version: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub changelog: Option<String>,
    pub release_date: DateTimeWithTimeZone,
    #[sea_orm(default_value = "0")]
    pub download_count: i64,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::plugin::Entity",
        from = "Column::PluginId",
        to = "super::plugin::Column::Id"
    )]
    Plugin,
}

impl Related<super::plugin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plugin.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
