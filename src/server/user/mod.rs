pub mod access;
mod builds;
mod projects;
mod shares;
mod tokens;
mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::server::AppState;
use crate::server::upload::upload_authenticated;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        // User tokens
        .route("/user/tokens", get(tokens::list_user_tokens))
        .route("/user/tokens", post(tokens::create_user_token))
        .route("/user/tokens/{id}", delete(tokens::delete_user_token))
        // Projects
        .route("/projects", get(projects::list_projects))
        .route("/projects", post(projects::create_project))
        .route(
            "/projects/{id}",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route("/projects/{id}/refresh-token", post(projects::rotate_token))
        .route(
            "/projects/{id}/transfer-ownership",
            post(projects::transfer_project),
        )
        // Project tokens
        .route("/projects/{id}/tokens", get(tokens::list_project_tokens))
        .route("/projects/{id}/tokens", post(tokens::create_project_token))
        .route(
            "/projects/{id}/tokens/{token_id}",
            delete(tokens::delete_project_token),
        )
        // Project shares (one per group)
        .route("/projects/{id}/shares", get(shares::list_shares))
        .route("/projects/{id}/shares", post(shares::create_share))
        .route(
            "/projects/{id}/shares/{share_id}",
            delete(shares::delete_share),
        )
        // Coverage history
        .route("/projects/{id}/builds", get(builds::list_builds))
        .route("/builds/{id}", get(builds::get_build))
        .route("/builds/{id}/jobs", get(builds::list_jobs))
        .route("/jobs", post(upload_authenticated))
        .route("/jobs/{id}", get(builds::get_job))
        .route("/jobs/{id}/files", get(builds::list_files))
        .route("/files/{id}", get(builds::get_file))
        .route("/users", get(users::list_users))
}
