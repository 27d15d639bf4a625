use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::access::load_managed_project;
use crate::auth::{RequireAuth, TokenKind, generate_token};
use crate::server::AppState;
use crate::server::dto::{CreateTokenRequest, CreateTokenResponse};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::validate_token_name;

// User tokens

pub async fn list_user_tokens(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let tokens = state
        .store
        .list_user_tokens(principal.user.id)
        .api_err("Failed to list tokens")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(tokens)))
}

pub async fn create_user_token(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTokenRequest>,
) -> impl IntoResponse {
    if principal.project.is_some() {
        return Err(ApiError::forbidden("Project tokens cannot create user tokens"));
    }
    let name = validate_token_name(&req.name)?;
    let secret = generate_token(TokenKind::User);

    let token = state
        .store
        .create_user_token(principal.user.id, &name, &secret)
        .api_err("Failed to create token")?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateTokenResponse {
            id: token.id,
            name: token.name,
            token: secret,
            created_at: token.created_at,
        })),
    ))
}

pub async fn delete_user_token(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let deleted = state
        .store
        .delete_user_token(principal.user.id, id)
        .api_err("Failed to delete token")?;
    if !deleted {
        return Err(ApiError::not_found("Token not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(json!({ "message": "Token deleted" }))))
}

// Project tokens

pub async fn list_project_tokens(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;
    let tokens = state
        .store
        .list_project_tokens(&project.id)
        .api_err("Failed to list project tokens")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(tokens)))
}

pub async fn create_project_token(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateTokenRequest>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;
    let name = validate_token_name(&req.name)?;
    let secret = generate_token(TokenKind::Project);

    let token = state
        .store
        .create_project_token(&project.id, &name, &secret)
        .api_err("Failed to create project token")?;

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(CreateTokenResponse {
            id: token.id,
            name: token.name,
            token: secret,
            created_at: token.created_at,
        })),
    ))
}

pub async fn delete_project_token(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((id, token_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;

    let deleted = state
        .store
        .delete_project_token(&project.id, token_id)
        .api_err("Failed to delete project token")?;
    if !deleted {
        return Err(ApiError::not_found("Token not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(json!({ "message": "Token deleted" }))))
}
