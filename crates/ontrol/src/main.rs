use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ontconf::OntrolConfig;
use ontrol::directory::InMemoryRouterStore;
use ontrol::{telemetry, Core, Router, TracingAuditSink};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The Ontrol control plane daemon
///
/// Hosts the router fleet access layer: connection pools, circuit breakers,
/// the fleet query engine, the NAT rule mutator and the health monitor.
/// The HTTP API layer runs separately and consumes this process's core.
///
/// Configuration is loaded from (in order, later wins):
/// 1. Compiled defaults
/// 2. /etc/ontrol/config.toml
/// 3. ~/.config/ontrol/config.toml
/// 4. ./ontrol.toml (or --config path)
/// 5. Environment variables (ONTROL_*)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (overrides ./ontrol.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show loaded configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = OntrolConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if cli.show_config {
        println!("# Configuration sources:");
        for path in &sources.files {
            println!("#   - {}", path.display());
        }
        if !sources.env_overrides.is_empty() {
            println!("# Environment overrides:");
            for var in &sources.env_overrides {
                println!("#   - {var}");
            }
        }
        println!();
        println!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(config.log_filter());

    info!("Configuration loaded from:");
    for path in &sources.files {
        info!("   - {}", path.display());
    }
    if !sources.env_overrides.is_empty() {
        info!("   Environment overrides: {:?}", sources.env_overrides);
    }

    // The relational router store is an external collaborator; standalone
    // deployments seed the directory from [[routers]] in the config file.
    let routers: Vec<Router> = config.routers.iter().cloned().map(Router::from).collect();
    if routers.is_empty() {
        info!("no routers configured; the directory starts empty");
    }
    let store = Arc::new(InMemoryRouterStore::new(routers));
    let audit = Arc::new(TracingAuditSink);

    let core = Core::build(&config, store, audit)
        .await
        .context("Failed to build the control plane")?;
    info!(
        routers = core.directory.snapshot().len(),
        api = %format!("{}:{}", config.server.host, config.server.port),
        "ontrol core ready"
    );

    let shutdown = CancellationToken::new();
    let tasks = core.spawn_background(&shutdown);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    shutdown.cancel();
    for task in tasks {
        let _ = task.await;
    }
    core.shutdown().await;
    info!("ontrol stopped");

    Ok(())
}
