use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::{is_unique_violation, ApiError};
use forgemart_db::entities::{plugin, purchase, user};
use forgemart_db::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    #[serde(rename = "pluginId")]
    pub plugin_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub id: Uuid,
    pub plugin_id: Uuid,
    pub price: f64,
    pub transaction_id: String,
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
}

impl From<purchase::Model> for PurchaseResponse {
    fn from(p: purchase::Model) -> Self {
        Self {
            id: p.id,
            plugin_id: p.plugin_id,
            price: p.price,
            transaction_id: p.transaction_id,
            created_at: p.created_at,
        }
    }
}

/// Purchase enriched with the plugin it bought and that plugin's author.
#[derive(Debug, Serialize)]
pub struct PurchaseDetailResponse {
    #[serde(flatten)]
    pub purchase: PurchaseResponse,
    pub plugin_name: Option<String>,
    pub plugin_category: Option<String>,
    pub plugin_thumbnail_url: Option<String>,
    pub plugin_author: Option<String>,
}

/// 16 bytes of OS randomness rendered as 32 lowercase hex chars.
fn new_transaction_id() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

/// POST /api/purchases (auth required)
pub async fn create_purchase(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreatePurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    let buyer_id = auth_user.0.sub;

    let plugin = plugin::Entity::find_by_id(body.plugin_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plugin not found".to_string()))?;

    if plugin.author_id == buyer_id {
        return Err(ApiError::Conflict(
            "You cannot purchase your own plugin".to_string(),
        ));
    }

    // Friendly pre-check; the UNIQUE (user_id, plugin_id) index is the
    // real guarantee under concurrent requests.
    let existing = purchase::Entity::find()
        .filter(purchase::Column::UserId.eq(buyer_id))
        .filter(purchase::Column::PluginId.eq(plugin.id))
        .one(&state.db)
        .await?;

    if existing.is_some() {
        return Err(ApiError::Conflict(
            "You have already purchased this plugin".to_string(),
        ));
    }

    let entry = purchase::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(buyer_id),
        plugin_id: Set(plugin.id),
        // Price at time of purchase, immune to later repricing
        price: Set(plugin.price),
        transaction_id: Set(new_transaction_id()),
        created_at: Set(chrono::Utc::now().fixed_offset()),
    };

    let created = entry.insert(&state.db).await.map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict("You have already purchased this plugin".to_string())
        } else {
            ApiError::Db(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

/// GET /api/purchases (auth required)
pub async fn list_my_purchases(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<PurchaseDetailResponse>>, ApiError> {
    let rows = purchase::Entity::find()
        .filter(purchase::Column::UserId.eq(auth_user.0.sub))
        .order_by_desc(purchase::Column::CreatedAt)
        .find_also_related(plugin::Entity)
        .all(&state.db)
        .await?;

    // Batch-resolve the authors of the purchased plugins
    let author_ids: Vec<Uuid> = rows
        .iter()
        .filter_map(|(_, p)| p.as_ref().map(|p| p.author_id))
        .collect();

    let authors: std::collections::HashMap<Uuid, String> = if author_ids.is_empty() {
        Default::default()
    } else {
        user::Entity::find()
            .filter(user::Column::Id.is_in(author_ids))
            .all(&state.db)
            .await?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect()
    };

    let data = rows
        .into_iter()
        .map(|(purchase, plugin)| {
            let plugin_author = plugin
                .as_ref()
                .and_then(|p| authors.get(&p.author_id).cloned());
            PurchaseDetailResponse {
                purchase: purchase.into(),
                plugin_name: plugin.as_ref().map(|p| p.name.clone()),
                plugin_category: plugin.as_ref().map(|p| p.category.clone()),
                plugin_thumbnail_url: plugin.as_ref().and_then(|p| p.thumbnail_url.clone()),
                plugin_author,
            }
        })
        .collect();

    Ok(Json(data))
}

/// GET /api/purchases/check/:plugin_id (auth required)
///
/// Always answers with a boolean, even for plugin ids that do not exist.
pub async fn check_purchase(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(plugin_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let existing = purchase::Entity::find()
        .filter(purchase::Column::UserId.eq(auth_user.0.sub))
        .filter(purchase::Column::PluginId.eq(plugin_id))
        .one(&state.db)
        .await?;

    Ok(Json(
        serde_json::json!({ "purchased": existing.is_some() }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_is_32_lowercase_hex() {
        let id = new_transaction_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_transaction_ids_are_unique() {
        let a = new_transaction_id();
        let b = new_transaction_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_create_purchase_request_uses_camel_case() {
        let json = r#"{"pluginId":"550e8400-e29b-41d4-a716-446655440000"}"#;
        let req: CreatePurchaseRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            req.plugin_id.to_string(),
            "550e8400-e29b-41d4-a716-446655440000"
        );
    }

    #[test]
    fn test_purchase_detail_flattens_purchase_fields() {
        let now = chrono::Utc::now().fixed_offset();
        let detail = PurchaseDetailResponse {
            purchase: PurchaseResponse {
                id: Uuid::new_v4(),
                plugin_id: Uuid::new_v4(),
                price: 4.99,
                transaction_id: "ab".repeat(16),
                created_at: now,
            },
            plugin_name: Some("EconomyCore".to_string()),
            plugin_category: None,
            plugin_thumbnail_url: None,
            plugin_author: Some("steve".to_string()),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["price"], 4.99);
        assert_eq!(json["plugin_name"], "EconomyCore");
        assert_eq!(json["plugin_author"], "steve");
    }
}
