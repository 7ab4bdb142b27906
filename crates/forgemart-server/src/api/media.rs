use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use forgemart_db::AppState;

/// GET /uploads/*path — serve stored thumbnails.
///
/// Only the thumbnails directory is reachable here; plugin archives are
/// purchase-gated and must go through the download endpoint.
pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if !path.starts_with("thumbnails/") {
        return Err(StatusCode::FORBIDDEN);
    }

    let base_path = state.storage.full_path("");
    let file_path = state.storage.full_path(&path);

    // Prevent path traversal
    let canonical = file_path.canonicalize().map_err(|_| StatusCode::NOT_FOUND)?;
    let base_canonical = base_path
        .canonicalize()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !canonical.starts_with(&base_canonical) {
        return Err(StatusCode::FORBIDDEN);
    }

    if !canonical.is_file() {
        return Err(StatusCode::NOT_FOUND);
    }

    let data = tokio::fs::read(&canonical)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let content_type = match canonical.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
    headers.insert(
        header::CACHE_CONTROL,
        "public, max-age=31536000, immutable".parse().unwrap(),
    );

    Ok((headers, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use forgemart_storage::LocalStorage;
    use tower::ServiceExt;

    fn test_state(base: &std::path::Path) -> Arc<AppState> {
        Arc::new(AppState {
            db: sea_orm::DatabaseConnection::Disconnected,
            jwt_secret: "test-media-secret".to_string(),
            domain: "localhost".to_string(),
            storage: Arc::new(LocalStorage::new(base)),
        })
    }

    fn media_app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/uploads/{*path}", get(serve_upload))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_serves_stored_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();
        std::fs::write(dir.path().join("thumbnails/thumb.png"), b"\x89PNG fake").unwrap();

        let app = media_app(test_state(dir.path()));
        let req = Request::builder()
            .uri("/uploads/thumbnails/thumb.png")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/png"
        );
        assert!(resp
            .headers()
            .get(header::CACHE_CONTROL)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("immutable"));
    }

    #[tokio::test]
    async fn test_plugin_archives_not_served() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        std::fs::write(dir.path().join("plugins/secret.jar"), b"PK\x03\x04").unwrap();

        let app = media_app(test_state(dir.path()));
        let req = Request::builder()
            .uri("/uploads/plugins/secret.jar")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();

        let app = media_app(test_state(dir.path()));
        let req = Request::builder()
            .uri("/uploads/thumbnails/nope.png")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_out_of_base_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("thumbnails")).unwrap();

        let app = media_app(test_state(dir.path()));
        let req = Request::builder()
            .uri("/uploads/thumbnails/../../etc/passwd")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
    }
}
