use axum::http::StatusCode;

use crate::auth::Principal;
use crate::server::response::{ApiError, StoreOptionExt, StoreResultExt};
use crate::store::Store;
use crate::types::{Build, Job, Project};

/// Returns true if the principal may read the project: admins, its owner,
/// a token scoped to it, or a member of a group it is shared with.
pub fn can_view(
    store: &dyn Store,
    principal: &Principal,
    project: &Project,
) -> Result<bool, ApiError> {
    if principal.can_manage(project) {
        return Ok(true);
    }
    if principal.project.is_some() || principal.user.groups.is_empty() {
        return Ok(false);
    }

    let shares = store
        .list_project_shares(&project.id)
        .api_err("Failed to check project shares")?;

    Ok(shares.iter().any(|s| principal.user.in_group(&s.group_name)))
}

/// Loads a project the principal can see. Invisible projects are reported as
/// missing.
pub fn load_visible_project(
    store: &dyn Store,
    principal: &Principal,
    id: &str,
) -> Result<Project, ApiError> {
    let project = store
        .get_project(id)
        .api_err("Failed to get project")?
        .or_not_found("Project not found")?;

    if !can_view(store, principal, &project)? {
        return Err(ApiError::not_found("Project not found"));
    }
    Ok(project)
}

/// Loads a project the principal may modify.
pub fn load_managed_project(
    store: &dyn Store,
    principal: &Principal,
    id: &str,
) -> Result<Project, ApiError> {
    let project = load_visible_project(store, principal, id)?;
    if !principal.can_manage(&project) {
        return Err(ApiError::forbidden("Only the project owner can do this"));
    }
    Ok(project)
}

fn not_found_as(err: ApiError, message: &'static str) -> ApiError {
    if err.status == StatusCode::NOT_FOUND {
        ApiError::not_found(message)
    } else {
        err
    }
}

pub fn load_visible_build(
    store: &dyn Store,
    principal: &Principal,
    id: i64,
) -> Result<Build, ApiError> {
    let build = store
        .get_build(id)
        .api_err("Failed to get build")?
        .or_not_found("Build not found")?;

    load_visible_project(store, principal, &build.project_id)
        .map_err(|e| not_found_as(e, "Build not found"))?;
    Ok(build)
}

pub fn load_visible_job(
    store: &dyn Store,
    principal: &Principal,
    id: i64,
) -> Result<Job, ApiError> {
    let job = store
        .get_job(id)
        .api_err("Failed to get job")?
        .or_not_found("Job not found")?;

    load_visible_build(store, principal, job.build_id)
        .map_err(|e| not_found_as(e, "Job not found"))?;
    Ok(job)
}

/// Hides the upload token from principals who cannot manage the project.
pub fn redact(principal: &Principal, mut project: Project) -> Project {
    if !principal.can_manage(&project) {
        project.token.clear();
    }
    project
}
