use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use tag_mesh::config::{load_config, MeshConfig};
use tag_mesh::gateway::HttpError;
use tag_mesh::health::HealthMonitor;
use tag_mesh::lifecycle::{self, signals, Shutdown};
use tag_mesh::observability::logging;
use tag_mesh::registry::Registry;
use tag_mesh::tag::{GetTagListRequest, TagServiceClient};

#[derive(Parser)]
#[command(name = "tag-client")]
#[command(about = "Call GetTagList on the tag service", long_about = None)]
struct Cli {
    /// Tag name filter.
    #[arg(short, long, default_value = "")]
    name: String,

    #[arg(short, long, default_value_t = 1)]
    state: u32,

    /// Server address; repeat for several. Without it the service is
    /// resolved through the registry.
    #[arg(short, long)]
    target: Vec<String>,

    /// TOML config file (the `client` and `registry` sections are used).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of calls; 0 keeps calling until interrupted.
    #[arg(long, default_value_t = 1)]
    count: u32,

    /// Pause between calls, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => MeshConfig::default(),
    };
    if !cli.target.is_empty() {
        config.client.targets = cli.target.clone();
    }

    let store = lifecycle::coordination_store(&config.registry)?;
    let registry = Registry::new(store, config.registry.namespace.clone());
    let client = TagServiceClient::connect(
        &config.client,
        &registry,
        lifecycle::tracer(&config.observability),
    )
    .await?;

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());
    let mut stop = shutdown.subscribe();

    let monitor = config.client.health_check.enabled.then(|| {
        let monitor = HealthMonitor::new(client.pool().clone(), config.client.health_check.settings());
        tokio::spawn(monitor.run(shutdown.subscribe()))
    });

    let request = GetTagListRequest {
        name: cli.name.clone(),
        state: cli.state,
    };
    let mut failures = 0u32;
    let mut sent = 0u32;
    loop {
        match client.get_tag_list(request.clone()).await {
            Ok(reply) => println!("{}", serde_json::to_string(&reply)?),
            Err(status) => {
                failures += 1;
                eprintln!("{}", serde_json::to_string(&HttpError::from_status(&status))?);
            }
        }
        sent += 1;
        if cli.count != 0 && sent >= cli.count {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(cli.interval_ms)) => {}
            _ = stop.recv() => break,
        }
    }

    shutdown.trigger();
    if let Some(monitor) = monitor {
        let _ = monitor.await;
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
