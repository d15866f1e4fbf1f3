use dotenvy::dotenv;
use faceserver::acquisition::{init_drive, FETCH_TIMEOUT};
use faceserver::config::AppConfig;
use faceserver::faces::FaceAnalyzer;
use faceserver::server::run_server;
use faceserver::shared::state::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let engine = FaceAnalyzer::load(&config.model)?;

    let drive = init_drive(config.drive.as_ref()).await;
    if config.drive.is_none() {
        info!("no DRIVE_SERVER configured, storage client uses ambient AWS credentials");
    }

    let http = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        drive: Some(drive),
        http,
        config,
    });

    run_server(state).await?;
    Ok(())
}
