use anyhow::{Context, Result};
use clap::Parser;
use mockapi::{Config, DevServer, HostConfig, MockApiOptions, MockApiPlugin};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Development server answering configured paths with mock handlers
#[derive(Debug, Parser)]
#[command(name = "mockapi-server", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "mockapi.toml")]
    config: PathBuf,

    /// Project root (overrides [server].root)
    #[arg(long)]
    root: Option<String>,

    /// Listen port (overrides [server].port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Execution mode (overrides [server].mode)
    #[arg(long)]
    mode: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config).unwrap_or_else(|e| {
        warn!("Failed to load config: {:#}, using defaults", e);
        Config::default()
    });
    config.apply_env()?;

    if let Some(root) = cli.root {
        config.server.root = root;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(mode) = cli.mode {
        config.server.mode = mode;
    }

    let root = PathBuf::from(&config.server.root);
    info!(
        "Mode: {}, Entry: {:?}",
        config.server.mode,
        config.mock.entry_path(&root)
    );

    let mut server = DevServer::new(HostConfig {
        mode: config.server.mode.clone(),
        root,
    })
    .with_max_body_bytes(config.server.max_body_bytes);

    let options = MockApiOptions::from_config(&config.mock)?;
    server.install(Arc::new(MockApiPlugin::new(options))).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, server.router()).await?;
    Ok(())
}
