use axum::{extract::State, http::StatusCode, Json};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::jwt::{generate_token_pair, validate_token, TokenPair, TokenType};
use super::password::{hash_password, verify_password};
use crate::error::ApiError;
use forgemart_db::entities::user;
use forgemart_db::AppState;

// ─── Request/Response DTOs ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl From<user::Model> for UserResponse {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            role: u.role.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub tokens: TokenPair,
}

pub(crate) fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), ApiError> {
    if username.len() < 3 || username.len() > 64 {
        return Err(ApiError::Validation(
            "Username must be between 3 and 64 characters".to_string(),
        ));
    }

    if username.contains('@') || username.contains('/') || username.contains(' ') {
        return Err(ApiError::Validation(
            "Username cannot contain @, / or spaces".to_string(),
        ));
    }

    if password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    if !email.contains('@')
        || email.starts_with('@')
        || email.ends_with('@')
        || !email.split('@').nth(1).is_some_and(|d| d.contains('.'))
        || email.len() > 254
    {
        return Err(ApiError::Validation("Invalid email address".to_string()));
    }

    Ok(())
}

// ─── Handlers ──────────────────────────────────────────────────────

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    validate_registration(&body.username, &body.email, &body.password)?;

    let existing = user::Entity::find()
        .filter(
            user::Column::Username
                .eq(&body.username)
                .or(user::Column::Email.eq(&body.email)),
        )
        .one(&state.db)
        .await?;

    if existing.is_some() {
        return Err(ApiError::Conflict(
            "Username or email already taken".to_string(),
        ));
    }

    let password_hash = hash_password(&body.password)
        .map_err(|e| ApiError::Internal(format!("password hash failed: {e}")))?;

    let user_count: u64 = user::Entity::find().count(&state.db).await?;

    // First account on a fresh instance gets admin
    let role = if user_count == 0 {
        user::UserRole::Admin
    } else {
        user::UserRole::User
    };

    let now = chrono::Utc::now().fixed_offset();
    let new_user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(body.username.clone()),
        email: Set(body.email.clone()),
        password_hash: Set(password_hash),
        role: Set(role),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = new_user.insert(&state.db).await?;

    let tokens = generate_token_pair(
        created.id,
        &created.username,
        created.role.as_str(),
        &state.jwt_secret,
    )
    .map_err(|e| ApiError::Internal(format!("token generation failed: {e}")))?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: created.into(),
            tokens,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let found = user::Entity::find()
        .filter(user::Column::Email.eq(&body.email))
        .one(&state.db)
        .await?;

    // Uniform message: do not reveal whether the email exists
    let invalid = || ApiError::Unauthorized("Invalid credentials".to_string());

    let user = found.ok_or_else(invalid)?;

    let valid = verify_password(&body.password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(invalid());
    }

    let tokens = generate_token_pair(
        user.id,
        &user.username,
        user.role.as_str(),
        &state.jwt_secret,
    )
    .map_err(|e| ApiError::Internal(format!("token generation failed: {e}")))?;

    Ok(Json(AuthResponse {
        user: user.into(),
        tokens,
    }))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let claims = validate_token(&body.refresh_token, &state.jwt_secret)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired refresh token".to_string()))?;

    if claims.token_type != TokenType::Refresh {
        return Err(ApiError::Unauthorized(
            "Refresh token required".to_string(),
        ));
    }

    // Re-read the user so a renamed or deleted account cannot mint tokens
    let user = user::Entity::find_by_id(claims.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))?;

    let tokens = generate_token_pair(
        user.id,
        &user.username,
        user.role.as_str(),
        &state.jwt_secret,
    )
    .map_err(|e| ApiError::Internal(format!("token generation failed: {e}")))?;

    Ok(Json(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_registration_accepts_normal_input() {
        assert!(validate_registration("steve", "steve@example.com", "longenough").is_ok());
    }

    #[test]
    fn test_validate_registration_short_username() {
        assert!(validate_registration("ab", "a@b.com", "longenough").is_err());
    }

    #[test]
    fn test_validate_registration_forbidden_username_chars() {
        assert!(validate_registration("has space", "a@b.com", "longenough").is_err());
        assert!(validate_registration("with@sign", "a@b.com", "longenough").is_err());
        assert!(validate_registration("with/slash", "a@b.com", "longenough").is_err());
    }

    #[test]
    fn test_validate_registration_short_password() {
        assert!(validate_registration("steve", "a@b.com", "short").is_err());
    }

    #[test]
    fn test_validate_registration_bad_email() {
        assert!(validate_registration("steve", "not-an-email", "longenough").is_err());
        assert!(validate_registration("steve", "@example.com", "longenough").is_err());
        assert!(validate_registration("steve", "steve@", "longenough").is_err());
        assert!(validate_registration("steve", "steve@nodot", "longenough").is_err());
    }

    #[test]
    fn test_register_request_deserializes() {
        let json = r#"{"username":"steve","email":"s@example.com","password":"longenough"}"#;
        let req: RegisterRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.username, "steve");
        assert_eq!(req.email, "s@example.com");
    }
}
