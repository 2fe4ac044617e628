use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

use config::env::ProcessEnv;
use config::settings::{AppConfig, Credentials};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::new()?;
    let port = config.server_port;
    info!(
        "Transcoding to {} {}x{} into bucket {}",
        config.invocation.dst_format,
        config.invocation.dst_width,
        config.invocation.dst_height,
        config.invocation.transcode_bucket
    );

    let state = AppState::new(config, Credentials::from_env(&ProcessEnv));
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Transcode function listening on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
