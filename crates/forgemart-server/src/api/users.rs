use axum::{extract::State, Extension, Json};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::routes::UserResponse;
use crate::error::ApiError;
use forgemart_db::entities::user;
use forgemart_db::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// GET /api/users/profile (auth required)
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = user::Entity::find_by_id(auth_user.0.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(user.into()))
}

/// PUT /api/users/profile (auth required)
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = user::Entity::find_by_id(auth_user.0.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if let Some(ref username) = body.username {
        if username.len() < 3 || username.len() > 64 {
            return Err(ApiError::Validation(
                "Username must be between 3 and 64 characters".to_string(),
            ));
        }
        let taken = user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .filter(user::Column::Id.ne(user.id))
            .one(&state.db)
            .await?;
        if taken.is_some() {
            return Err(ApiError::Conflict("Username already taken".to_string()));
        }
    }

    if let Some(ref email) = body.email {
        if !email.contains('@') || email.len() > 254 {
            return Err(ApiError::Validation("Invalid email address".to_string()));
        }
        let taken = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .filter(user::Column::Id.ne(user.id))
            .one(&state.db)
            .await?;
        if taken.is_some() {
            return Err(ApiError::Conflict("Email already in use".to_string()));
        }
    }

    let mut active: user::ActiveModel = user.into();
    if let Some(username) = body.username {
        active.username = Set(username);
    }
    if let Some(email) = body.email {
        active.email = Set(email);
    }
    active.updated_at = Set(chrono::Utc::now().fixed_offset());

    let updated = active.update(&state.db).await?;

    Ok(Json(updated.into()))
}

/// PUT /api/users/password (auth required)
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.new_password.len() < 8 {
        return Err(ApiError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let user = user::Entity::find_by_id(auth_user.0.sub)
        .one(&state.db)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let valid = verify_password(&body.current_password, &user.password_hash).unwrap_or(false);
    if !valid {
        return Err(ApiError::Unauthorized(
            "Current password is incorrect".to_string(),
        ));
    }

    let password_hash = hash_password(&body.new_password)
        .map_err(|e| ApiError::Internal(format!("password hash failed: {e}")))?;

    let mut active: user::ActiveModel = user.into();
    active.password_hash = Set(password_hash);
    active.updated_at = Set(chrono::Utc::now().fixed_offset());
    active.update(&state.db).await?;

    Ok(Json(serde_json::json!({ "message": "Password updated" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_profile_request_partial_fields() {
        let json = r#"{"username":"newname"}"#;
        let req: UpdateProfileRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.username.as_deref(), Some("newname"));
        assert!(req.email.is_none());
    }

    #[test]
    fn test_change_password_request_deserializes() {
        let json = r#"{"current_password":"old","new_password":"newlongenough"}"#;
        let req: ChangePasswordRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.current_password, "old");
        assert_eq!(req.new_password, "newlongenough");
    }
}
