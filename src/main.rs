//! Zero-trust edge gateway server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use zt_gateway::config::{load_config, GatewayConfig};
use zt_gateway::lifecycle::shutdown_signal;
use zt_gateway::observability::init_tracing;
use zt_gateway::policy::repository::load_rules;
use zt_gateway::policy::{InMemoryRuleRepository, RuleWatcher};
use zt_gateway::{GatewayComponents, GatewayServer, Shutdown};

#[derive(Parser)]
#[command(name = "zt-gateway")]
#[command(about = "Zero-trust edge gateway", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::with_default_routes(),
    };

    init_tracing(&config.observability);
    tracing::info!("zt-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    if config.auth.jwt_secret == zt_gateway::config::schema::DEFAULT_JWT_SECRET {
        tracing::warn!("Using the default JWT secret; set auth.jwt_secret for production");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        api_prefix = %config.listener.api_prefix,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    // Rules: load once, then keep the watcher alive for the process lifetime.
    let repository = Arc::new(InMemoryRuleRepository::empty());
    let _watcher = match &config.policy.rules_path {
        Some(path) => {
            let path = PathBuf::from(path);
            repository.replace(load_rules(&path)?);
            if config.policy.watch {
                Some(RuleWatcher::new(&path, repository.clone()).run()?)
            } else {
                None
            }
        }
        None => {
            tracing::warn!("No rules file configured; every request will be denied");
            None
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config, GatewayComponents::in_memory(repository))?;
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
