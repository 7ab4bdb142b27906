use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use sea_orm::sea_query::{extension::postgres::PgExpr, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbBackend,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::purchases::PurchaseResponse;
use crate::auth::middleware::AuthUser;
use crate::error::{is_unique_violation, ApiError};
use forgemart_db::entities::{plugin, plugin_version, purchase, review, user};
use forgemart_db::AppState;
use forgemart_storage::{ArtifactKind, ArtifactStore};

const DEFAULT_PAGE_SIZE: u64 = 12;

/// Recomputes a plugin's average rating from its committed reviews in a
/// single statement. Both references to the plugin bind the same `$1`;
/// the correlated subquery runs inside the UPDATE, so two concurrent
/// review inserts cannot overwrite each other with a stale mean.
const RECOMPUTE_AVERAGE_RATING_SQL: &str = "UPDATE plugins \
    SET average_rating = (SELECT COALESCE(AVG(rating), 0) FROM reviews WHERE plugin_id = $1), \
        updated_at = $2 \
    WHERE id = $1";

// ─── Request/Response DTOs ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub category: Option<String>,
    pub featured: Option<bool>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortKey {
    Popular,
    PriceLow,
    PriceHigh,
    Rating,
    Newest,
}

impl SortKey {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("popular") => SortKey::Popular,
            Some("price-low") => SortKey::PriceLow,
            Some("price-high") => SortKey::PriceHigh,
            Some("rating") => SortKey::Rating,
            _ => SortKey::Newest,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct PluginResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    /// Author username, when resolvable
    pub author: Option<String>,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price: f64,
    pub features: Vec<String>,
    pub requirements: Option<String>,
    pub thumbnail_url: Option<String>,
    pub average_rating: f64,
    pub download_count: i64,
    pub featured: bool,
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
    pub updated_at: chrono::DateTime<chrono::FixedOffset>,
}

impl PluginResponse {
    fn from_model(p: plugin::Model, author: Option<String>) -> Self {
        let features = p.feature_list();
        Self {
            id: p.id,
            author_id: p.author_id,
            author,
            name: p.name,
            description: p.description,
            category: p.category,
            price: p.price,
            features,
            requirements: p.requirements,
            thumbnail_url: p.thumbnail_url,
            average_rating: p.average_rating,
            download_count: p.download_count,
            featured: p.featured,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub id: Uuid,
    pub position: i32,
    pub version_number: String,
    pub minecraft_version: String,
    pub changelog: Option<String>,
    pub release_date: chrono::DateTime<chrono::FixedOffset>,
    pub download_count: i64,
}

impl From<plugin_version::Model> for VersionResponse {
    fn from(v: plugin_version::Model) -> Self {
        Self {
            id: v.id,
            position: v.position,
            version_number: v.version_number,
            minecraft_version: v.minecraft_version,
            changelog: v.changelog,
            release_date: v.release_date,
            download_count: v.download_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: Option<String>,
    pub rating: i16,
    pub comment: String,
    pub helpful_count: i64,
    pub created_at: chrono::DateTime<chrono::FixedOffset>,
}

#[derive(Debug, Serialize)]
pub struct PluginDetailResponse {
    #[serde(flatten)]
    pub plugin: PluginResponse,
    pub versions: Vec<VersionResponse>,
    pub reviews: Vec<ReviewResponse>,
    /// Caller's purchase records for this plugin; present only when the
    /// request carried a valid bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchases: Option<Vec<PurchaseResponse>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: f64,
    pub comment: String,
}

// ─── Catalog ────────────────────────────────────────────────────────

/// GET /api/plugins (public)
pub async fn list_plugins(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<PaginatedResponse<PluginResponse>>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100);

    let mut select = plugin::Entity::find();

    if let Some(ref category) = params.category {
        select = select.filter(plugin::Column::Category.eq(category));
    }

    if let Some(featured) = params.featured {
        select = select.filter(plugin::Column::Featured.eq(featured));
    }

    if let Some(search) = params.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        select = select.filter(
            Condition::any()
                .add(Expr::col((plugin::Entity, plugin::Column::Name)).ilike(pattern.clone()))
                .add(Expr::col((plugin::Entity, plugin::Column::Description)).ilike(pattern)),
        );
    }

    select = match SortKey::parse(params.sort.as_deref()) {
        SortKey::Popular => select.order_by_desc(plugin::Column::DownloadCount),
        SortKey::PriceLow => select.order_by_asc(plugin::Column::Price),
        SortKey::PriceHigh => select.order_by_desc(plugin::Column::Price),
        SortKey::Rating => select.order_by_desc(plugin::Column::AverageRating),
        SortKey::Newest => select.order_by_desc(plugin::Column::CreatedAt),
    };

    let paginator = select.paginate(&state.db, per_page);
    let total = paginator.num_items().await?;
    let plugins = paginator.fetch_page(page - 1).await?;

    let authors = author_usernames(&state.db, plugins.iter().map(|p| p.author_id)).await?;

    let data = plugins
        .into_iter()
        .map(|p| {
            let author = authors.get(&p.author_id).cloned();
            PluginResponse::from_model(p, author)
        })
        .collect();

    let total_pages = total.div_ceil(per_page);

    Ok(Json(PaginatedResponse {
        data,
        total,
        page,
        per_page,
        total_pages,
    }))
}

/// GET /api/plugins/:id (public, identity optional)
pub async fn get_plugin(
    State(state): State<Arc<AppState>>,
    auth_user: Option<Extension<AuthUser>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PluginDetailResponse>, ApiError> {
    let plugin = plugin::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plugin not found".to_string()))?;

    let author = user::Entity::find_by_id(plugin.author_id)
        .one(&state.db)
        .await?
        .map(|u| u.username);

    let versions: Vec<VersionResponse> = plugin_version::Entity::find()
        .filter(plugin_version::Column::PluginId.eq(plugin.id))
        .order_by_asc(plugin_version::Column::Position)
        .all(&state.db)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    let review_rows = review::Entity::find()
        .filter(review::Column::PluginId.eq(plugin.id))
        .order_by_desc(review::Column::CreatedAt)
        .all(&state.db)
        .await?;

    let reviewers = author_usernames(&state.db, review_rows.iter().map(|r| r.user_id)).await?;

    let reviews = review_rows
        .into_iter()
        .map(|r| ReviewResponse {
            id: r.id,
            user_id: r.user_id,
            username: reviewers.get(&r.user_id).cloned(),
            rating: r.rating,
            comment: r.comment,
            helpful_count: r.helpful_count,
            created_at: r.created_at,
        })
        .collect();

    let purchases = match auth_user {
        Some(Extension(auth)) => Some(
            purchase::Entity::find()
                .filter(purchase::Column::UserId.eq(auth.0.sub))
                .filter(purchase::Column::PluginId.eq(plugin.id))
                .all(&state.db)
                .await?
                .into_iter()
                .map(Into::into)
                .collect(),
        ),
        None => None,
    };

    Ok(Json(PluginDetailResponse {
        plugin: PluginResponse::from_model(plugin, author),
        versions,
        reviews,
        purchases,
    }))
}

/// GET /api/plugins/user (auth required)
pub async fn my_plugins(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<Vec<PluginResponse>>, ApiError> {
    let plugins = plugin::Entity::find()
        .filter(plugin::Column::AuthorId.eq(auth_user.0.sub))
        .order_by_desc(plugin::Column::CreatedAt)
        .all(&state.db)
        .await?;

    let username = auth_user.0.username.clone();
    let data = plugins
        .into_iter()
        .map(|p| PluginResponse::from_model(p, Some(username.clone())))
        .collect();

    Ok(Json(data))
}

// ─── Authoring ──────────────────────────────────────────────────────

/// POST /api/plugins (auth required, multipart)
pub async fn create_plugin(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<PluginResponse>), ApiError> {
    let form = read_upload_form(multipart).await?;

    let name = require_field(&form.name, "name")?;
    let description = require_field(&form.description, "description")?;
    let category = require_field(&form.category, "category")?;
    let version_number = require_field(&form.version, "version")?;
    let minecraft_version = require_field(&form.minecraft_version, "minecraftVersion")?;

    let price = parse_price(form.price.as_deref())?;
    let features = parse_features(form.features.as_deref())?;

    let (plugin_file, thumbnail_file) = match (form.plugin_file, form.thumbnail_file) {
        (Some(p), Some(t)) => (p, t),
        _ => {
            return Err(ApiError::Validation(
                "Please upload both plugin file and thumbnail".to_string(),
            ));
        }
    };

    validate_plugin_archive(&plugin_file)?;
    validate_thumbnail(&thumbnail_file)?;

    // Blobs go to the store first; on any later failure they are removed
    let archive_path = state
        .storage
        .store_file(
            ArtifactKind::PluginArchive,
            &plugin_file.filename,
            &plugin_file.data,
        )
        .await?;

    let thumbnail_path = match state
        .storage
        .store_file(
            ArtifactKind::Thumbnail,
            &thumbnail_file.filename,
            &thumbnail_file.data,
        )
        .await
    {
        Ok(path) => path,
        Err(e) => {
            remove_blob_quietly(state.storage.as_ref(), &archive_path).await;
            return Err(e.into());
        }
    };

    let now = chrono::Utc::now().fixed_offset();
    let plugin_id = Uuid::new_v4();

    let insert_result: Result<plugin::Model, sea_orm::DbErr> = async {
        let txn = state.db.begin().await?;

        let created = plugin::ActiveModel {
            id: Set(plugin_id),
            author_id: Set(auth_user.0.sub),
            name: Set(name.clone()),
            description: Set(description.clone()),
            category: Set(category.clone()),
            price: Set(price),
            features: Set(features.clone()),
            requirements: Set(form.requirements.clone()),
            thumbnail_url: Set(Some(format!("/uploads/{thumbnail_path}"))),
            average_rating: Set(0.0),
            download_count: Set(0),
            featured: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        plugin_version::ActiveModel {
            id: Set(Uuid::new_v4()),
            plugin_id: Set(plugin_id),
            position: Set(0),
            version_number: Set(version_number.clone()),
            file_path: Set(archive_path.clone()),
            minecraft_version: Set(minecraft_version.clone()),
            changelog: Set(None),
            release_date: Set(now),
            download_count: Set(0),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(created)
    }
    .await;

    let created = match insert_result {
        Ok(model) => model,
        Err(e) => {
            remove_blob_quietly(state.storage.as_ref(), &archive_path).await;
            remove_blob_quietly(state.storage.as_ref(), &thumbnail_path).await;
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(PluginResponse::from_model(
            created,
            Some(auth_user.0.username),
        )),
    ))
}

/// PUT /api/plugins/:id (auth required, author only, multipart)
///
/// Supplied fields overwrite, absent fields are untouched. A supplied
/// price of 0 sets the price to 0.
pub async fn update_plugin(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<PluginResponse>, ApiError> {
    let plugin = plugin::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plugin not found".to_string()))?;

    if plugin.author_id != auth_user.0.sub {
        return Err(ApiError::Forbidden(
            "You are not authorized to update this plugin".to_string(),
        ));
    }

    let form = read_upload_form(multipart).await?;

    let mut active: plugin::ActiveModel = plugin.into();

    if let Some(name) = form.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("name cannot be empty".to_string()));
        }
        active.name = Set(name);
    }
    if let Some(description) = form.description {
        if description.trim().is_empty() {
            return Err(ApiError::Validation(
                "description cannot be empty".to_string(),
            ));
        }
        active.description = Set(description);
    }
    if let Some(category) = form.category {
        if category.trim().is_empty() {
            return Err(ApiError::Validation("category cannot be empty".to_string()));
        }
        active.category = Set(category);
    }
    if form.price.is_some() {
        active.price = Set(parse_price(form.price.as_deref())?);
    }
    if form.features.is_some() {
        active.features = Set(parse_features(form.features.as_deref())?);
    }
    if let Some(requirements) = form.requirements {
        active.requirements = Set(Some(requirements));
    }

    if let Some(thumbnail_file) = form.thumbnail_file {
        validate_thumbnail(&thumbnail_file)?;
        let thumbnail_path = state
            .storage
            .store_file(
                ArtifactKind::Thumbnail,
                &thumbnail_file.filename,
                &thumbnail_file.data,
            )
            .await?;
        active.thumbnail_url = Set(Some(format!("/uploads/{thumbnail_path}")));
    }

    active.updated_at = Set(chrono::Utc::now().fixed_offset());

    let updated = active.update(&state.db).await?;

    Ok(Json(PluginResponse::from_model(
        updated,
        Some(auth_user.0.username),
    )))
}

/// POST /api/plugins/:id/versions (auth required, author only, multipart)
pub async fn add_version(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<VersionResponse>), ApiError> {
    let plugin = plugin::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plugin not found".to_string()))?;

    if plugin.author_id != auth_user.0.sub {
        return Err(ApiError::Forbidden(
            "You are not authorized to update this plugin".to_string(),
        ));
    }

    let form = read_upload_form(multipart).await?;

    let version_number = require_field(&form.version_number, "versionNumber")?;
    let minecraft_version = require_field(&form.minecraft_version, "minecraftVersion")?;

    let plugin_file = form
        .plugin_file
        .ok_or_else(|| ApiError::Validation("Please upload a plugin file".to_string()))?;

    validate_plugin_archive(&plugin_file)?;

    let archive_path = state
        .storage
        .store_file(
            ArtifactKind::PluginArchive,
            &plugin_file.filename,
            &plugin_file.data,
        )
        .await?;

    // Versions are append-only; the new row always lands past the tail
    let latest = plugin_version::Entity::find()
        .filter(plugin_version::Column::PluginId.eq(plugin.id))
        .order_by_desc(plugin_version::Column::Position)
        .one(&state.db)
        .await?;
    let position = latest.map(|v| v.position + 1).unwrap_or(0);

    let now = chrono::Utc::now().fixed_offset();
    let entry = plugin_version::ActiveModel {
        id: Set(Uuid::new_v4()),
        plugin_id: Set(plugin.id),
        position: Set(position),
        version_number: Set(version_number),
        file_path: Set(archive_path.clone()),
        minecraft_version: Set(minecraft_version),
        changelog: Set(form.changelog),
        release_date: Set(now),
        download_count: Set(0),
        created_at: Set(now),
    };

    let created = match entry.insert(&state.db).await {
        Ok(model) => model,
        Err(e) => {
            remove_blob_quietly(state.storage.as_ref(), &archive_path).await;
            return Err(version_insert_error(e));
        }
    };

    Ok((StatusCode::CREATED, Json(created.into())))
}

// ─── Access-gated delivery ──────────────────────────────────────────

/// POST /api/plugins/:id/reviews (auth required, purchase-gated)
pub async fn add_review(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let plugin = plugin::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plugin not found".to_string()))?;

    if !has_access(&state.db, auth_user.0.sub, &plugin).await? {
        return Err(ApiError::Forbidden(
            "You must purchase this plugin before leaving a review".to_string(),
        ));
    }

    if body.rating.fract() != 0.0 || !(1.0..=5.0).contains(&body.rating) {
        return Err(ApiError::Validation(
            "Rating must be an integer between 1 and 5".to_string(),
        ));
    }
    let rating = body.rating as i16;

    if body.comment.trim().is_empty() {
        return Err(ApiError::Validation("Comment is required".to_string()));
    }

    let existing = review::Entity::find()
        .filter(review::Column::PluginId.eq(plugin.id))
        .filter(review::Column::UserId.eq(auth_user.0.sub))
        .one(&state.db)
        .await?;

    if existing.is_some() {
        return Err(ApiError::Conflict(
            "You have already reviewed this plugin".to_string(),
        ));
    }

    // The review row and the recomputed mean land together or not at all
    let result: Result<(), sea_orm::DbErr> = async {
        let txn = state.db.begin().await?;

        let now = chrono::Utc::now().fixed_offset();
        review::ActiveModel {
            id: Set(Uuid::new_v4()),
            plugin_id: Set(plugin.id),
            user_id: Set(auth_user.0.sub),
            rating: Set(rating),
            comment: Set(body.comment.clone()),
            helpful_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            RECOMPUTE_AVERAGE_RATING_SQL,
            [plugin.id.into(), now.into()],
        ))
        .await?;

        txn.commit().await?;
        Ok(())
    }
    .await;

    result.map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict("You have already reviewed this plugin".to_string())
        } else {
            ApiError::Db(e)
        }
    })?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": "Review added" })),
    ))
}

/// GET /api/plugins/:id/download (auth required, purchase-gated)
pub async fn download_plugin(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let plugin = plugin::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("Plugin not found".to_string()))?;

    if !has_access(&state.db, auth_user.0.sub, &plugin).await? {
        return Err(ApiError::Forbidden(
            "You must purchase this plugin before downloading".to_string(),
        ));
    }

    let latest = plugin_version::Entity::find()
        .filter(plugin_version::Column::PluginId.eq(plugin.id))
        .order_by_desc(plugin_version::Column::Position)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("No version available for download".to_string()))?;

    let file_path = forgemart_storage::ensure_local_file(state.storage.as_ref(), &latest.file_path)
        .await
        .map_err(|_| ApiError::NotFound("Plugin file not found".to_string()))?;

    // Atomic in-database increments; a concurrent download cannot lose one
    plugin::Entity::update_many()
        .col_expr(
            plugin::Column::DownloadCount,
            Expr::col(plugin::Column::DownloadCount).add(1),
        )
        .filter(plugin::Column::Id.eq(plugin.id))
        .exec(&state.db)
        .await?;

    plugin_version::Entity::update_many()
        .col_expr(
            plugin_version::Column::DownloadCount,
            Expr::col(plugin_version::Column::DownloadCount).add(1),
        )
        .filter(plugin_version::Column::Id.eq(latest.id))
        .exec(&state.db)
        .await?;

    let file_size = tokio::fs::metadata(&file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot stat plugin file: {e}")))?
        .len();

    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|e| ApiError::Internal(format!("cannot open plugin file: {e}")))?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let filename = download_file_name(&plugin.name, &latest.version_number, &latest.file_path);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        "application/java-archive".parse().unwrap(),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        file_size.to_string().parse().unwrap(),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{filename}\"")
            .parse()
            .map_err(|_| ApiError::Internal("invalid download filename".to_string()))?,
    );

    Ok((headers, body))
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Download/review gate: the author and anyone who purchased get in.
async fn has_access(
    db: &DatabaseConnection,
    user_id: Uuid,
    plugin: &plugin::Model,
) -> Result<bool, sea_orm::DbErr> {
    if plugin.author_id == user_id {
        return Ok(true);
    }
    let purchased = purchase::Entity::find()
        .filter(purchase::Column::UserId.eq(user_id))
        .filter(purchase::Column::PluginId.eq(plugin.id))
        .one(db)
        .await?;
    Ok(purchased.is_some())
}

async fn author_usernames(
    db: &DatabaseConnection,
    ids: impl Iterator<Item = Uuid>,
) -> Result<HashMap<Uuid, String>, sea_orm::DbErr> {
    let mut unique: Vec<Uuid> = ids.collect();
    unique.sort();
    unique.dedup();
    if unique.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(user::Entity::find()
        .filter(user::Column::Id.is_in(unique))
        .all(db)
        .await?
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect())
}

pub(crate) struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct UploadForm {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<String>,
    pub version: Option<String>,
    pub version_number: Option<String>,
    pub minecraft_version: Option<String>,
    pub requirements: Option<String>,
    pub features: Option<String>,
    pub changelog: Option<String>,
    pub plugin_file: Option<UploadedFile>,
    pub thumbnail_file: Option<UploadedFile>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "pluginFile" => {
                let filename = field.file_name().unwrap_or("plugin.jar").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Read error: {e}")))?;
                form.plugin_file = Some(UploadedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            "thumbnailFile" => {
                let filename = field.file_name().unwrap_or("thumbnail.png").to_string();
                let content_type = field.content_type().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("Read error: {e}")))?;
                form.thumbnail_file = Some(UploadedFile {
                    filename,
                    content_type,
                    data: data.to_vec(),
                });
            }
            "name" => form.name = field.text().await.ok(),
            "description" => form.description = field.text().await.ok(),
            "category" => form.category = field.text().await.ok(),
            "price" => form.price = field.text().await.ok(),
            "version" => form.version = field.text().await.ok(),
            "versionNumber" => form.version_number = field.text().await.ok(),
            "minecraftVersion" => form.minecraft_version = field.text().await.ok(),
            "requirements" => form.requirements = field.text().await.ok(),
            "features" => form.features = field.text().await.ok(),
            "changelog" => form.changelog = field.text().await.ok(),
            _ => {}
        }
    }

    Ok(form)
}

fn require_field(value: &Option<String>, name: &str) -> Result<String, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::Validation(format!(
            "Missing required field: {name}"
        ))),
    }
}

fn parse_price(raw: Option<&str>) -> Result<f64, ApiError> {
    let raw = match raw.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => return Ok(0.0),
    };
    let price: f64 = raw
        .parse()
        .map_err(|_| ApiError::Validation("Price must be a number".to_string()))?;
    if !price.is_finite() || price < 0.0 {
        return Err(ApiError::Validation(
            "Price must be zero or positive".to_string(),
        ));
    }
    Ok(price)
}

fn parse_features(raw: Option<&str>) -> Result<serde_json::Value, ApiError> {
    match raw.map(str::trim) {
        None => Ok(serde_json::json!([])),
        Some("") => Ok(serde_json::json!([])),
        Some(s) => {
            let list: Vec<String> = serde_json::from_str(s).map_err(|_| {
                ApiError::Validation("features must be a JSON array of strings".to_string())
            })?;
            Ok(serde_json::json!(list))
        }
    }
}

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

fn validate_plugin_archive(file: &UploadedFile) -> Result<(), ApiError> {
    let ext = std::path::Path::new(&file.filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let named_jar = ext == "jar" || file.content_type.contains("java-archive");
    if !named_jar {
        return Err(ApiError::Validation(
            "Plugin file must be a .jar archive".to_string(),
        ));
    }

    // Jars are zip containers; reject disguised uploads
    if !file.data.starts_with(&ZIP_MAGIC) {
        return Err(ApiError::Validation(
            "Plugin file content is not a valid archive".to_string(),
        ));
    }

    Ok(())
}

fn validate_thumbnail(file: &UploadedFile) -> Result<(), ApiError> {
    if is_image_content(&file.content_type, &file.data) {
        Ok(())
    } else {
        Err(ApiError::Validation(
            "Thumbnail must be an image".to_string(),
        ))
    }
}

fn is_image_content(content_type: &str, data: &[u8]) -> bool {
    if content_type.starts_with("image/") {
        return true;
    }
    data.starts_with(&[0x89, b'P', b'N', b'G'])
        || data.starts_with(&[0xFF, 0xD8, 0xFF])
        || data.starts_with(b"GIF8")
        || (data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP")
}

async fn remove_blob_quietly(storage: &dyn ArtifactStore, relative_path: &str) {
    if let Err(e) = storage.delete_file(relative_path).await {
        tracing::warn!("failed to clean up stored blob {relative_path}: {e}");
    }
}

/// Two concurrent appends to the same plugin can race to one position;
/// the unique index rejects the loser, which surfaces as a retryable
/// conflict rather than a server fault.
fn version_insert_error(e: sea_orm::DbErr) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::Conflict("A new version was just added; please retry".to_string())
    } else {
        ApiError::Db(e)
    }
}

fn download_file_name(name: &str, version_number: &str, file_path: &str) -> String {
    let ext = std::path::Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jar");
    format!("{name}-v{version_number}.{ext}")
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
