use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, post, put},
    Json, Router,
};
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use forgemart_db::AppState;

mod api;
mod auth;
mod error;

/// Uploaded plugin archives and thumbnails are capped at 20 MiB
const UPLOAD_BODY_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Serialize)]
struct ApiStatus {
    status: &'static str,
    version: &'static str,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Database connection
    let db_config = forgemart_db::DatabaseConfig::from_env();
    tracing::info!("connecting to database...");
    let db = forgemart_db::connect(&db_config)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("running database migrations...");
    forgemart_migration::Migrator::up(&db, None)
        .await
        .expect("failed to run migrations");
    tracing::info!("migrations complete");

    // Build application state
    let jwt_secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev-secret-change-me-in-production".to_string());

    // SECURITY: warn if JWT secret is the default fallback
    if jwt_secret == "dev-secret-change-me-in-production"
        || jwt_secret == "change-me-to-a-secure-random-string"
    {
        tracing::error!(
            "JWT_SECRET is set to a known default value! \
             This is a critical security vulnerability. \
             Set JWT_SECRET to a strong random string (≥32 chars) in production."
        );
        if std::env::var("FORGEMART_ENV").unwrap_or_default() == "production" {
            panic!("Refusing to start: JWT_SECRET must be set to a secure value in production.");
        }
    }
    let domain = std::env::var("FORGEMART_DOMAIN").unwrap_or_else(|_| "localhost:8080".to_string());

    tracing::info!("instance domain: {}", domain);

    // Initialize storage backend (S3 or local)
    let storage: Arc<dyn forgemart_storage::ArtifactStore> = match std::env::var("STORAGE_BACKEND")
        .unwrap_or_default()
        .as_str()
    {
        "s3" => {
            tracing::info!("initializing S3 storage backend");
            let endpoint = std::env::var("S3_ENDPOINT").ok();
            let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());
            let access_key = std::env::var("S3_ACCESS_KEY")
                .expect("S3_ACCESS_KEY is required when STORAGE_BACKEND=s3");
            let secret_key = std::env::var("S3_SECRET_KEY")
                .expect("S3_SECRET_KEY is required when STORAGE_BACKEND=s3");
            let bucket =
                std::env::var("S3_BUCKET").expect("S3_BUCKET is required when STORAGE_BACKEND=s3");
            let prefix = std::env::var("S3_PREFIX").unwrap_or_default();

            Arc::new(
                forgemart_storage::S3Storage::from_config(
                    endpoint.as_deref(),
                    &region,
                    &access_key,
                    &secret_key,
                    &bucket,
                    &prefix,
                )
                .await
                .expect("failed to initialize S3 storage"),
            )
        }
        _ => {
            tracing::info!("using local filesystem storage backend");
            Arc::new(forgemart_storage::LocalStorage::from_env())
        }
    };

    let state = Arc::new(AppState {
        db,
        jwt_secret,
        domain,
        storage,
    });

    // Rate limiter for auth endpoints
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(6)
            .burst_size(10)
            .finish()
            .expect("failed to build rate limiter config"),
    );

    // Auth routes (public, rate-limited)
    let auth_routes = Router::new()
        .route("/register", post(auth::routes::register))
        .route("/login", post(auth::routes::login))
        .route("/refresh", post(auth::routes::refresh))
        .layer(GovernorLayer::new(auth_governor_conf));

    // Public catalog routes
    let public_api = Router::new()
        .route("/plugins", get(api::plugins::list_plugins))
        .merge(
            // Plugin detail is public but enriched for signed-in callers
            Router::new()
                .route("/plugins/{id}", get(api::plugins::get_plugin))
                .layer(axum_middleware::from_fn_with_state(
                    state.clone(),
                    auth::middleware::optional_auth,
                )),
        );

    // Protected API routes (auth required)
    let protected_api = Router::new()
        .merge(
            Router::new()
                .route("/plugins", post(api::plugins::create_plugin))
                .route("/plugins/{id}", put(api::plugins::update_plugin))
                .route("/plugins/{id}/versions", post(api::plugins::add_version))
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/plugins/user", get(api::plugins::my_plugins))
        .route("/plugins/{id}/reviews", post(api::plugins::add_review))
        .route("/plugins/{id}/download", get(api::plugins::download_plugin))
        .route(
            "/purchases",
            post(api::purchases::create_purchase).get(api::purchases::list_my_purchases),
        )
        .route(
            "/purchases/check/{plugin_id}",
            get(api::purchases::check_purchase),
        )
        .route(
            "/users/profile",
            get(api::users::get_profile).put(api::users::update_profile),
        )
        .route("/users/password", put(api::users::change_password))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(public_api)
        .merge(protected_api);

    // CORS configuration — restrict to configured origins
    let cors = {
        let allowed_origins_str = std::env::var("CORS_ORIGINS").unwrap_or_default();
        if allowed_origins_str.is_empty() {
            tracing::warn!("CORS_ORIGINS not set — defaulting to restrictive CORS. Set CORS_ORIGINS=http://localhost:3000 for dev.");
            let scheme = std::env::var("FORGEMART_SCHEME").unwrap_or_else(|_| "https".to_string());
            let origin = format!("{scheme}://{}", state.domain);
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(
                    HeaderValue::from_str(&origin)
                        .unwrap_or_else(|_| HeaderValue::from_static("https://localhost")),
                ))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .expose_headers(tower_http::cors::Any)
        } else {
            let origins: Vec<HeaderValue> = allowed_origins_str
                .split(',')
                .filter_map(|s| HeaderValue::from_str(s.trim()).ok())
                .collect();
            tracing::info!("CORS allowed origins: {:?}", origins);
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
                .expose_headers(tower_http::cors::Any)
        }
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/uploads/{*path}", get(api::media::serve_upload))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!(%addr, "server started");

    axum::serve(
        tokio::net::TcpListener::bind(addr).await.unwrap(),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

async fn healthz() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
