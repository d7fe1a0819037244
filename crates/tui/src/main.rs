mod app;

use std::{
    fs::{self, OpenOptions},
    sync::Arc,
};

use about_time_core::{
    config::{self, AppConfig},
    llm::{Generator, OpenAiClient},
    Game,
};
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config_path = config::ensure_default_config()?;
    let config = AppConfig::load()
        .with_context(|| format!("failed to load configuration ({})", config_path.display()))?;
    info!(
        model = %config.model,
        base_url = %config.base_url,
        stream = config.stream,
        "configuration loaded"
    );

    let client = OpenAiClient::new(&config).context("failed to build generation client")?;
    let generator: Arc<dyn Generator> = Arc::new(client);

    let mut app = app::AboutTimeApp::new(Game::new(&config), generator);
    app.run().await
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("about-time.log");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(move || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .expect("failed to open log file")
        });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
