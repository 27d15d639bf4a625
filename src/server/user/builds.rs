use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use super::access::{load_visible_build, load_visible_job, load_visible_project};
use crate::auth::RequireAuth;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::types::BuildWithJobs;

/// Builds of a project, newest first.
pub async fn list_builds(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let project = load_visible_project(state.store.as_ref(), &principal, &id)?;
    let builds = state
        .store
        .list_builds(&project.id)
        .api_err("Failed to list builds")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(builds)))
}

pub async fn get_build(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let build = load_visible_build(state.store.as_ref(), &principal, id)?;
    let jobs = state
        .store
        .list_jobs(build.id)
        .api_err("Failed to list jobs")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(BuildWithJobs { build, jobs })))
}

pub async fn list_jobs(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let build = load_visible_build(state.store.as_ref(), &principal, id)?;
    let jobs = state
        .store
        .list_jobs(build.id)
        .api_err("Failed to list jobs")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(jobs)))
}

pub async fn get_job(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let job = load_visible_job(state.store.as_ref(), &principal, id)?;
    Ok::<_, ApiError>(Json(ApiResponse::success(job)))
}

pub async fn list_files(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let job = load_visible_job(state.store.as_ref(), &principal, id)?;
    let files = state
        .store
        .list_job_files(job.id)
        .api_err("Failed to list files")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(files)))
}

pub async fn get_file(
    RequireAuth(principal): RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let file = state
        .store
        .get_job_file(id)
        .api_err("Failed to get file")?
        .or_not_found("File not found")?;

    load_visible_job(state.store.as_ref(), &principal, file.job_id)
        .map_err(|e| match e.status {
            axum::http::StatusCode::NOT_FOUND => ApiError::not_found("File not found"),
            _ => e,
        })?;

    Ok::<_, ApiError>(Json(ApiResponse::success(file)))
}
