use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{Method, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use super::admin::admin_router;
use super::badge::project_badge;
use super::login::login_router;
use super::upload::upload_v2;
use super::user::user_router;
use crate::auth::{MAX_FORM_BYTES, resolve_auth};
use crate::config::ServerConfig;
use crate::oidc::OidcClient;
use crate::session::SessionStore;
use crate::store::Store;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionStore>,
    /// Absent when no identity provider is configured.
    pub oidc: Option<Arc<OidcClient>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<SessionStore>,
        oidc: Option<Arc<OidcClient>>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            oidc,
            config: Arc::new(config),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = middleware::from_fn_with_state(state.clone(), resolve_auth);

    let api = Router::new()
        .nest("/api/v1/admin", admin_router())
        .nest("/api/v1", user_router())
        .nest("/auth", login_router())
        .route_layer(auth);

    Router::new()
        .route("/health", get(health))
        .route("/upload/v2", post(upload_v2))
        .route("/projects/{id}/badge.svg", get(project_badge))
        .merge(api)
        .layer(DefaultBodyLimit::max(MAX_FORM_BYTES))
        .layer(cors())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
