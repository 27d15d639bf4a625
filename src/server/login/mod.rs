mod handlers;
mod provision;

pub use provision::{bootstrap_first_admin, provision_user};

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::AppState;

pub fn login_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(handlers::login))
        .route("/callback", get(handlers::callback))
        .route("/logout", post(handlers::logout))
        .route("/me", get(handlers::me))
        .route("/config", get(handlers::auth_config))
        .route("/refresh", post(handlers::refresh))
        .route("/groups", get(handlers::groups))
        .route("/groups/refresh", post(handlers::refresh_groups))
}
