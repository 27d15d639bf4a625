use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::access::load_managed_project;
use crate::auth::RequireAuth;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::CreateShareRequest;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::validate_group_name;

pub async fn list_shares(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;
    let shares = state
        .store
        .list_project_shares(&project.id)
        .api_err("Failed to list project shares")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(shares)))
}

/// Shares a project with a group. Non-admins may only share with groups they
/// currently hold.
pub async fn create_share(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CreateShareRequest>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;
    let group = validate_group_name(&req.group_name)?;

    if !principal.is_admin() && !principal.user.in_group(&group) {
        return Err(ApiError::forbidden("You do not have access to this group"));
    }

    match state.store.create_project_share(&project.id, &group) {
        Ok(share) => {
            tracing::info!(project_id = %project.id, group = %group, "project shared");
            Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(share))))
        }
        Err(Error::AlreadyExists) => Err(ApiError::conflict(
            "Project is already shared with this group",
        )),
        Err(e) => {
            tracing::error!("Failed to create share: {e}");
            Err(ApiError::internal("Failed to create share"))
        }
    }
}

pub async fn delete_share(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path((id, share_id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;

    let deleted = state
        .store
        .delete_project_share(&project.id, share_id)
        .api_err("Failed to delete share")?;
    if !deleted {
        return Err(ApiError::not_found("Share not found"));
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(json!({ "message": "Share deleted" }))))
}
