//! # Coverhub
//!
//! A self-hosted code coverage server that accepts Coveralls-format uploads,
//! usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! coverhub = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coverhub::config::ServerConfig;
//! use coverhub::server::{AppState, create_router};
//! use coverhub::session::SessionStore;
//! use coverhub::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(
//!     Arc::new(store),
//!     Arc::new(SessionStore::new()),
//!     None,
//!     config,
//! ));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `coverhub` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod coverage;
pub mod error;
pub mod oidc;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
