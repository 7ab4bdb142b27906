use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Marketplace listing. Versions and reviews hang off this aggregate via
/// foreign keys and have no API surface of their own; `average_rating`
/// and `download_count` are maintained by the service layer.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "plugins")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning user. Never changes after creation.
    pub author_id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub category: String,
    pub price: f64,
    /// JSON array of free-text feature strings
    #[sea_orm(column_type = "JsonBinary")]
    pub features: serde_json::Value,
    #[sea_orm(column_type = "Text", nullable)]
    pub requirements: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Mean of all review ratings, 0 when there are none
    #[sea_orm(default_value = "0")]
    pub average_rating: f64,
    #[sea_orm(default_value = "0")]
    pub download_count: i64,
    pub featured: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Decode the JSONB features column into a string list.
    pub fn feature_list(&self) -> Vec<String> {
        serde_json::from_value(self.features.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::AuthorId",
        to = "super::user::Column::Id"
    )]
    Author,
    #[sea_orm(has_many = "super::plugin_version::Entity")]
    Version,
    #[sea_orm(has_many = "super::review::Entity")]
    Review,
    #[sea_orm(has_many = "super::purchase::Entity")]
    Purchase,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Author.def()
    }
}

impl Related<super::plugin_version::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Version.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Review.def()
    }
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_list_decodes_array() {
        let model = Model {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            name: "EconomyCore".into(),
            description: "Server economy".into(),
            category: "economy".into(),
            price: 4.99,
            features: serde_json::json!(["shops", "auctions"]),
            requirements: None,
            thumbnail_url: None,
            average_rating: 0.0,
            download_count: 0,
            featured: false,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        };
        assert_eq!(model.feature_list(), vec!["shops", "auctions"]);
    }

    #[test]
    fn test_feature_list_tolerates_bad_shape() {
        let model = Model {
            id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            name: "X".into(),
            description: "Y".into(),
            category: "misc".into(),
            price: 0.0,
            features: serde_json::json!({"not": "a list"}),
            requirements: None,
            thumbnail_url: None,
            average_rating: 0.0,
            download_count: 0,
            featured: false,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: chrono::Utc::now().fixed_offset(),
        };
        assert!(model.feature_list().is_empty());
    }
}
