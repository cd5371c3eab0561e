use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::HeaderValue};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::api::{self, AppState, SharedState};
use super::db::{BoardDb, DbHandle};
use crate::config::ServiceConfig;

/// Configuration for the board server.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    /// Permissive CORS for local frontend work.
    pub dev_mode: bool,
}

/// Origins from config, with credentials allowed. Dev mode lets anything in.
pub fn cors_layer(origins: &[String], dev_mode: bool) -> Result<CorsLayer> {
    if dev_mode {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .with_context(|| format!("Invalid CORS origin '{}'", origin))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

/// Build the full application router with CORS and request tracing.
pub fn build_router(state: SharedState, dev_mode: bool) -> Result<Router> {
    let cors = cors_layer(&state.config.cors_origins, dev_mode)?;
    Ok(api::api_router()
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

/// Create the database file (and its directory) and apply the schema.
pub fn open_database(config: &ServiceConfig) -> Result<BoardDb> {
    if let Some(parent) = config.database_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    BoardDb::new(&config.database_path).context("Failed to initialize board database")
}

/// Start the board server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let ServerConfig { service, dev_mode } = config;
    service.validate()?;
    if service.is_production() && dev_mode {
        warn!("dev mode enables permissive CORS in a production environment");
    }

    let db = open_database(&service)?;
    info!(path = %service.database_path.display(), "database ready");

    let addr = format!("{}:{}", service.host, service.port);
    let state = Arc::new(AppState::new(DbHandle::new(db), service)?);
    let app = build_router(state, dev_mode)?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(%local_addr, dev_mode, "kanban service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
