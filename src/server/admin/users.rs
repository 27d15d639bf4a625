use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use crate::auth::{RequireAdmin, TokenKind, generate_token};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{CreateUserRequest, CreatedUserResponse, UpdateUserRequest};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{validate_email, validate_group_name};
use crate::types::NewUser;

/// Pre-seeds a user who is linked to their identity on first login.
pub async fn create_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let email = validate_email(&req.email)?;
    let token = generate_token(TokenKind::Legacy);

    let user = match state.store.create_user(&NewUser {
        email,
        name: req.name.trim().to_string(),
        admin: req.admin,
        token: Some(token.clone()),
        ..Default::default()
    }) {
        Ok(user) => user,
        Err(Error::AlreadyExists) => return Err(ApiError::conflict("User already exists")),
        Err(e) => {
            tracing::error!("Failed to create user: {e}");
            return Err(ApiError::internal("Failed to create user"));
        }
    };

    tracing::info!(user_id = user.id, admin = user.admin, "user created");
    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreatedUserResponse { user, token })),
    ))
}

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let users = state.store.list_users().api_err("Failed to list users")?;
    Ok::<_, ApiError>(Json(ApiResponse::success(users)))
}

pub async fn get_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

pub async fn update_user(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> impl IntoResponse {
    let mut user = state
        .store
        .get_user(id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    if let Some(email) = req.email.as_deref() {
        user.email = validate_email(email)?;
    }
    if let Some(name) = req.name {
        user.name = name.trim().to_string();
    }
    if let Some(is_admin) = req.admin {
        if user.id == admin.user.id && !is_admin {
            return Err(ApiError::bad_request("Cannot remove your own admin rights"));
        }
        user.admin = is_admin;
    }
    if let Some(groups) = req.groups {
        user.groups = groups
            .iter()
            .map(|g| validate_group_name(g))
            .collect::<Result<_, _>>()?;
    }
    user.updated_at = Utc::now();

    match state.store.update_user(&user) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => return Err(ApiError::conflict("Email is already in use")),
        Err(Error::NotFound) => return Err(ApiError::not_found("User not found")),
        Err(e) => {
            tracing::error!("Failed to update user: {e}");
            return Err(ApiError::internal("Failed to update user"));
        }
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

/// Deletes a user. Their projects pass to the acting admin and their tokens
/// are revoked in the same transaction.
pub async fn delete_user(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if id == admin.user.id {
        return Err(ApiError::bad_request("Cannot delete your own account"));
    }

    let deleted = state
        .store
        .delete_user_transferring_projects(id, admin.user.id)
        .api_err("Failed to delete user")?;
    if !deleted {
        return Err(ApiError::not_found("User not found"));
    }

    tracing::info!(user_id = id, new_owner = admin.user.id, "user deleted");
    Ok::<_, ApiError>(Json(ApiResponse::success(json!({ "message": "User deleted" }))))
}
