use gatehouse_access::{Authenticator, CredentialStore, FederationClient};
use gatehouse_core::SystemClock;
use gatehouse_server::{
    AppState, cleanup, config::ServerConfig, db::PgCredentialStore, error::ServerError,
    oidc::OidcClient,
};
use rootcause::prelude::Report;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<ServerError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| ServerError::Config {
        details: e.to_string(),
    })?;
    let policy = config.session_policy().map_err(|e| ServerError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    // Bounds waiting for a connection and running each statement
    let timeout = Duration::from_secs(config.database_timeout_seconds);
    let connect_options = config
        .database_url
        .parse::<PgConnectOptions>()
        .map_err(|e| ServerError::Config {
            details: format!("invalid database URL: {e}"),
        })?
        .options([("statement_timeout", timeout.as_millis())]);
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| ServerError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| ServerError::Database {
            details: e.to_string(),
        })?;

    tracing::info!("Discovering OIDC provider...");
    let oidc_client = OidcClient::discover(config.oidc, timeout)
        .await
        .map_err(|e| ServerError::Provider {
            details: e.to_string(),
        })?;
    let federation = FederationClient::new(oidc_client).map_err(|e| ServerError::Config {
        details: e.to_string(),
    })?;

    let store: Arc<dyn CredentialStore> = Arc::new(PgCredentialStore::new(db_pool, timeout));
    let authenticator =
        Authenticator::new(store.clone(), federation, Arc::new(SystemClock), policy);

    // Cleanup expired tokens on startup, then periodically
    cleanup::purge_expired_tokens(authenticator.tokens()).await;
    cleanup::spawn(
        authenticator.tokens().clone(),
        Duration::from_secs(config.session.cleanup_interval_seconds),
    );

    let app = gatehouse_server::router(Arc::new(AppState::new(
        authenticator,
        store,
        config.session,
    )));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| ServerError::Io {
            details: format!("failed to bind to {}: {e}", config.bind_addr),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Io {
            details: e.to_string(),
        })?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
