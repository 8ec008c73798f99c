mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::archiver::Archiver;
use crate::config::Config;
use crate::db::Database;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub archiver: Archiver,
    pub db: Database,
    pub config: Arc<Config>,
}

/// Start the web server.
///
/// # Errors
///
/// Returns an error if the address is invalid or the listener cannot bind.
pub async fn serve(config: Config, db: Database, archiver: Archiver) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.web_host, config.web_port)
        .parse()
        .context("Invalid web server address")?;

    let state = AppState {
        archiver,
        db,
        config: Arc::new(config),
    };

    let app = create_app(state);

    info!(addr = %addr, "Starting HTTP web server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind web server")?;

    axum::serve(listener, app.into_make_service())
        .await
        .context("Web server error")?;

    Ok(())
}

/// Create the main application router.
///
/// Archived files are served from the output directory under the public asset
/// prefix, matching the image URLs returned by the content endpoint.
pub fn create_app(state: AppState) -> Router {
    let output_dir = state.config.output_dir.clone();
    let prefix = state.config.public_asset_prefix.trim_end_matches('/').to_string();
    info!(output_dir = %output_dir.display(), prefix = %prefix, "Serving archived files");

    Router::new()
        .merge(routes::router())
        .nest_service(&prefix, ServeDir::new(output_dir))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
