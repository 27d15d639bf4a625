use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::access::{load_managed_project, load_visible_project, redact};
use crate::auth::{Principal, RequireAuth, TokenKind, generate_token};
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::{
    CreateProjectRequest, RotateTokenResponse, TransferProjectRequest, UpdateProjectRequest,
};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_project_name;
use crate::store::Store;
use crate::types::{Project, ProjectWithShares};

const MAX_RETRIES: usize = 3;

/// Projects the principal can see. A project token only sees its own project.
pub fn visible_projects(
    store: &dyn Store,
    principal: &Principal,
) -> Result<Vec<Project>, ApiError> {
    if let Some(scope) = &principal.project {
        let project = store
            .get_project(&scope.id)
            .api_err("Failed to get project")?;
        return Ok(project.into_iter().collect());
    }

    if principal.is_admin() {
        return store.list_projects().api_err("Failed to list projects");
    }

    store
        .list_projects_visible_to(principal.user.id, &principal.user.groups)
        .api_err("Failed to list projects")
}

pub async fn list_projects(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let projects = visible_projects(state.store.as_ref(), &principal)?
        .into_iter()
        .map(|p| redact(&principal, p))
        .collect::<Vec<_>>();

    Ok::<_, ApiError>(Json(ApiResponse::success(projects)))
}

pub async fn create_project(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> impl IntoResponse {
    if principal.project.is_some() {
        return Err(ApiError::forbidden("Project tokens cannot create projects"));
    }

    let name = validate_project_name(&req.name)?;
    let now = Utc::now();
    let mut project = Project {
        id: Uuid::new_v4().to_string(),
        name,
        token: generate_token(TokenKind::Upload),
        default_branch: req.default_branch.unwrap_or_default().trim().to_string(),
        base_url: req.base_url.unwrap_or_default().trim().to_string(),
        coverage_rate: 0.0,
        user_id: principal.user.id,
        created_at: now,
        updated_at: now,
    };

    for attempt in 1..=MAX_RETRIES {
        match state.store.create_project(&project) {
            Ok(()) => {
                tracing::info!(
                    project_id = %project.id,
                    user_id = principal.user.id,
                    "project created"
                );
                return Ok::<_, ApiError>((
                    StatusCode::CREATED,
                    Json(ApiResponse::success(project)),
                ));
            }
            Err(Error::AlreadyExists) if attempt < MAX_RETRIES => {
                project.id = Uuid::new_v4().to_string();
                project.token = generate_token(TokenKind::Upload);
            }
            Err(e) => {
                tracing::error!("Failed to create project: {e}");
                return Err(ApiError::internal("Failed to create project"));
            }
        }
    }

    Err(ApiError::internal("Failed to create project"))
}

pub async fn get_project(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let project = load_visible_project(state.store.as_ref(), &principal, &id)?;
    let shares = state
        .store
        .list_project_shares(&project.id)
        .api_err("Failed to list project shares")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(ProjectWithShares {
        project: redact(&principal, project),
        shares,
    })))
}

pub async fn update_project(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> impl IntoResponse {
    let mut project = load_managed_project(state.store.as_ref(), &principal, &id)?;

    if let Some(name) = req.name.as_deref().filter(|n| !n.trim().is_empty()) {
        project.name = validate_project_name(name)?;
    }
    if let Some(branch) = req.default_branch.as_deref().filter(|b| !b.trim().is_empty()) {
        project.default_branch = branch.trim().to_string();
    }
    if let Some(url) = req.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
        project.base_url = url.trim().to_string();
    }
    project.updated_at = Utc::now();

    state
        .store
        .update_project(&project)
        .api_err("Failed to update project")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}

pub async fn delete_project(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let project = load_managed_project(state.store.as_ref(), &principal, &id)?;

    let deleted = state
        .store
        .delete_project(&project.id)
        .api_err("Failed to delete project")?;
    if !deleted {
        return Err(ApiError::not_found("Project not found"));
    }

    tracing::info!(project_id = %project.id, "project deleted");
    Ok::<_, ApiError>(Json(ApiResponse::success(json!({ "message": "Project deleted" }))))
}

/// Replaces the upload token; the old one stops working immediately.
pub async fn rotate_token(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let mut project = load_managed_project(state.store.as_ref(), &principal, &id)?;
    project.token = generate_token(TokenKind::Upload);
    project.updated_at = Utc::now();

    state
        .store
        .update_project(&project)
        .api_err("Failed to rotate project token")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(RotateTokenResponse {
        token: project.token,
    })))
}

pub async fn transfer_project(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TransferProjectRequest>,
) -> impl IntoResponse {
    let mut project = load_managed_project(state.store.as_ref(), &principal, &id)?;
    let new_owner = state
        .store
        .get_user(req.user_id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    project.user_id = new_owner.id;
    project.updated_at = Utc::now();
    state
        .store
        .update_project(&project)
        .api_err("Failed to transfer project")?;

    tracing::info!(
        project_id = %project.id,
        new_owner = new_owner.id,
        "project ownership transferred"
    );
    Ok::<_, ApiError>(Json(ApiResponse::success(project)))
}
