//! gatehouse HTTP server.
//!
//! Mounts the authentication core behind axum: a protected `/app` area, the
//! `/auth` login handshake, and silent renewal under `/account`.

pub mod cleanup;
pub mod config;
pub mod cookies;
pub mod db;
pub mod error;
pub mod middleware;
pub mod oidc;
pub mod routes;

use axum::{
    Router,
    routing::{get, post},
};
use config::SessionConfig;
use gatehouse_access::{Authenticator, CredentialStore};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub use middleware::RequireAuth;

/// Shared application state.
pub struct AppState {
    /// Orchestrates cookie validation and federated login.
    pub authenticator: Authenticator,
    /// Credential Store, for reading user records.
    pub store: Arc<dyn CredentialStore>,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(
        authenticator: Authenticator,
        store: Arc<dyn CredentialStore>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            authenticator,
            store,
            session_config,
        }
    }
}

/// Builds the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/app/me", get(routes::me))
        .route("/auth/login", get(routes::login))
        .route("/auth/callback", get(routes::callback))
        .route("/account/refresh", post(routes::refresh))
        .route("/healthz", get(routes::healthz))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
