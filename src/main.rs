use std::path::PathBuf;

use clap::Parser;

use tag_mesh::config::{load_config, MeshConfig};
use tag_mesh::lifecycle;
use tag_mesh::observability::logging;

#[derive(Parser)]
#[command(name = "tag-server")]
#[command(about = "Tag service: gRPC and HTTP/JSON on one port", long_about = None)]
struct Cli {
    /// Listen port, overrides `server.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MeshConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability.log_level);
    tracing::info!("tag-server v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        port = config.server.port,
        registry = ?config.registry.backend,
        downstream = %config.downstream.base_url,
        "Configuration loaded"
    );

    lifecycle::start(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
