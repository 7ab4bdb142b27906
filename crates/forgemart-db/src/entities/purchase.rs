use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ledger entry granting a user access to a plugin's downloads and
/// reviews. `price` is copied from the plugin at purchase time and never
/// re-derived; a unique index on (user_id, plugin_id) keeps the ledger
/// duplicate-free even under concurrent requests.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub plugin_id: Uuid,
    pub price: f64,
    /// 32 lowercase hex chars from a CSPRNG
    #[sea_orm(unique)]
    pub transaction_id: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::plugin::Entity",
        from = "Column::PluginId",
        to = "super::plugin::Column::Id"
    )]
    Plugin,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::plugin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plugin.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
