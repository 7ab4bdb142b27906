use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use super::jwt::{validate_token, Claims, TokenType};
use forgemart_db::AppState;

/// Extension type to access authenticated user claims in handlers
#[derive(Clone, Debug)]
pub struct AuthUser(pub Claims);

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Middleware: require valid access token
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(token) => token,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing or invalid Authorization header" })),
            )
                .into_response();
        }
    };

    match validate_token(token, &state.jwt_secret) {
        Ok(claims) if claims.token_type == TokenType::Access => {
            request.extensions_mut().insert(AuthUser(claims));
            next.run(request).await
        }
        Ok(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid token type, access token required" })),
        )
            .into_response(),
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid or expired token" })),
        )
            .into_response(),
    }
}

/// Middleware: attach identity when a valid access token is present, but
/// let the request through either way. Used on public endpoints whose
/// response is enriched for signed-in callers.
pub async fn optional_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&request) {
        if let Ok(claims) = validate_token(token, &state.jwt_secret) {
            if claims.token_type == TokenType::Access {
                request.extensions_mut().insert(AuthUser(claims));
            }
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::generate_token_pair;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware as axum_mw,
        routing::get,
        Extension, Router,
    };
    use forgemart_storage::LocalStorage;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let db = sea_orm::DatabaseConnection::Disconnected;
        Arc::new(AppState {
            db,
            jwt_secret: "test-middleware-secret".to_string(),
            domain: "localhost".to_string(),
            storage: Arc::new(LocalStorage::new("/tmp/test-middleware")),
        })
    }

    async fn ok_handler() -> &'static str {
        "OK"
    }

    async fn whoami_handler(user: Option<Extension<AuthUser>>) -> &'static str {
        match user {
            Some(_) => "known",
            None => "anonymous",
        }
    }

    fn auth_app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/protected", get(ok_handler))
            .layer(axum_mw::from_fn_with_state(state.clone(), require_auth))
            .with_state(state)
    }

    fn optional_app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/open", get(whoami_handler))
            .layer(axum_mw::from_fn_with_state(state.clone(), optional_auth))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_require_auth_no_header() {
        let app = auth_app(test_state());

        let req = HttpRequest::builder()
            .uri("/protected")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_auth_invalid_token() {
        let app = auth_app(test_state());

        let req = HttpRequest::builder()
            .uri("/protected")
            .header("Authorization", "Bearer invalid-token")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_auth_valid_access_token() {
        let state = test_state();
        let app = auth_app(state.clone());

        let pair =
            generate_token_pair(uuid::Uuid::new_v4(), "creator", "user", &state.jwt_secret)
                .unwrap();

        let req = HttpRequest::builder()
            .uri("/protected")
            .header("Authorization", format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_require_auth_refresh_token_rejected() {
        let state = test_state();
        let app = auth_app(state.clone());

        let pair =
            generate_token_pair(uuid::Uuid::new_v4(), "creator", "user", &state.jwt_secret)
                .unwrap();

        let req = HttpRequest::builder()
            .uri("/protected")
            .header("Authorization", format!("Bearer {}", pair.refresh_token))
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_auth_no_bearer_prefix() {
        let app = auth_app(test_state());

        let req = HttpRequest::builder()
            .uri("/protected")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_require_auth_wrong_secret() {
        let app = auth_app(test_state());

        let pair =
            generate_token_pair(uuid::Uuid::new_v4(), "creator", "user", "wrong-secret").unwrap();

        let req = HttpRequest::builder()
            .uri("/protected")
            .header("Authorization", format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_optional_auth_without_token_passes_through() {
        let app = optional_app(test_state());

        let req = HttpRequest::builder()
            .uri("/open")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"anonymous");
    }

    #[tokio::test]
    async fn test_optional_auth_with_valid_token_attaches_identity() {
        let state = test_state();
        let app = optional_app(state.clone());

        let pair =
            generate_token_pair(uuid::Uuid::new_v4(), "buyer", "user", &state.jwt_secret).unwrap();

        let req = HttpRequest::builder()
            .uri("/open")
            .header("Authorization", format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"known");
    }

    #[tokio::test]
    async fn test_optional_auth_with_garbage_token_stays_anonymous() {
        let app = optional_app(test_state());

        let req = HttpRequest::builder()
            .uri("/open")
            .header("Authorization", "Bearer garbage")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"anonymous");
    }
}
