/// Gofer API Server
///
/// HTTP surface of the media fetch service. Accepts a URL, shells out to
/// the downloader, and streams the artifact back while guaranteeing the
/// scratch file is removed afterwards.
mod auth;
mod routes;
mod stream;

use gofer_shared::config::ApiConfig;
use gofer_shared::fetcher::{clear_scratch_dir, Fetcher};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state for all API handlers.
pub struct AppState {
    pub api_key: String,
    pub fetcher: Fetcher,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gofer_api=info,tower_http=info".into()),
        )
        .init();

    let config = ApiConfig::from_env()?;

    // Scratch dir: create it, then sweep anything a previous run left behind.
    tokio::fs::create_dir_all(&config.download_dir).await?;
    match clear_scratch_dir(&config.download_dir).await {
        Ok(0) => {}
        Ok(n) => info!("Swept {} stale files from {}", n, config.download_dir.display()),
        Err(e) => warn!("Scratch sweep failed: {}", e),
    }

    let state = Arc::new(AppState {
        api_key: config.api_key.clone(),
        fetcher: Fetcher::new(config.ytdlp_bin.clone(), config.download_dir.clone()),
    });

    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Gofer API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
