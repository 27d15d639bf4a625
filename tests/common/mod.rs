#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use coverhub::auth::{TokenKind, generate_token};
use coverhub::config::ServerConfig;
use coverhub::oidc::OidcClient;
use coverhub::server::{AppState, create_router};
use coverhub::session::SessionStore;
use coverhub::store::{SqliteStore, Store};
use coverhub::types::{NewUser, Project, User};

pub struct TestApp {
    pub temp_dir: TempDir,
    pub state: Arc<AppState>,
    pub router: Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response is json")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Value of a `Set-Cookie` named `name`, if the response sets it.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&prefix))
            .map(|v| v[prefix.len()..].split(';').next().unwrap_or_default().to_string())
    }

    pub fn location(&self) -> String {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .expect("location header")
            .to_string()
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default(), None)
    }

    pub fn with_config(mut config: ServerConfig, oidc: Option<OidcClient>) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        config.data_dir = temp_dir.path().to_path_buf();

        let store = SqliteStore::new(config.db_path()).expect("open store");
        store.initialize().expect("initialize store");

        let state = Arc::new(AppState::new(
            Arc::new(store),
            Arc::new(SessionStore::new()),
            oidc.map(Arc::new),
            config,
        ));
        let router = create_router(state.clone());

        Self {
            temp_dir,
            state,
            router,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn send_json(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(Method::DELETE).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Creates a user with a legacy token and returns both.
    pub fn create_user(&self, email: &str, admin: bool, groups: &[&str]) -> (User, String) {
        let token = generate_token(TokenKind::Legacy);
        let user = self
            .store()
            .create_user(&NewUser {
                email: email.to_string(),
                name: email.split('@').next().unwrap_or_default().to_string(),
                admin,
                groups: groups.iter().map(|g| g.to_string()).collect(),
                token: Some(token.clone()),
                ..Default::default()
            })
            .expect("create user");
        (user, token)
    }

    pub fn create_project(&self, owner: &User, name: &str) -> Project {
        let now = Utc::now();
        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            token: generate_token(TokenKind::Upload),
            default_branch: "main".to_string(),
            base_url: String::new(),
            coverage_rate: 0.0,
            user_id: owner.id,
            created_at: now,
            updated_at: now,
        };
        self.store().create_project(&project).expect("create project");
        project
    }

    /// Total builds across every project.
    pub fn build_count(&self) -> usize {
        self.store()
            .list_projects()
            .expect("list projects")
            .iter()
            .map(|p| self.store().list_builds(&p.id).expect("list builds").len())
            .sum()
    }
}

/// A small Coveralls document: 4 measurable lines, 3 covered.
pub fn payload(repo_token: &str) -> Value {
    json!({
        "repo_token": repo_token,
        "service_name": "github-actions",
        "git": {
            "branch": "main",
            "head": { "id": "abc123", "message": "Add parser" }
        },
        "source_files": [
            { "name": "src/lib.rs", "source": "fn a() {}\nfn b() {}\n", "coverage": [1, 0, null] },
            { "name": "src/main.rs", "source": "fn main() {}\nfn c() {}\n", "coverage": [4, 2] }
        ]
    })
}
