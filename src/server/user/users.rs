use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::RequireAuth;
use crate::server::AppState;
use crate::server::dto::UserSummary;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

/// Candidate owners for a project transfer.
pub async fn list_users(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let users = state
        .store
        .list_users()
        .api_err("Failed to list users")?
        .into_iter()
        .map(UserSummary::from)
        .collect::<Vec<_>>();

    Ok::<_, ApiError>(Json(ApiResponse::success(users)))
}
