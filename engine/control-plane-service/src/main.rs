//! Session Control Plane Service
//!
//! `authority` serves the clock authority; `run` synchronizes against it and drives
//! every configured controllable through its trading sessions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use clock_sync::AuthorityServer;
use control_plane_service::{
    graceful_shutdown, initialize_logging_with_config, load_configuration,
    setup_signal_handlers, ServiceState,
};
use session_core::SystemClock;

#[derive(Parser)]
#[command(name = "control-plane")]
#[command(about = "Trading session control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the clock authority backed by the system clock
    Authority {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on, overriding `authority.bind`
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run the configured controllables
    Run {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Authority { config, bind } => serve_authority(config, bind).await,
        Commands::Run { config } => run(config).await,
        Commands::Config { config } => {
            let config = load_configuration(config.as_deref())?;
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

async fn serve_authority(config_path: Option<PathBuf>, bind: Option<SocketAddr>) -> Result<()> {
    let config =
        load_configuration(config_path.as_deref()).context("Failed to load configuration")?;
    let bind = config.authority.resolve_bind(bind)?;

    let _log_guard = initialize_logging_with_config(&config.logging)?;
    info!("Starting clock authority v{} on {}", env!("CARGO_PKG_VERSION"), bind);

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone())?;

    let server = Arc::new(AuthorityServer::new(Arc::new(SystemClock)));
    server.start(bind, shutdown).await.context("Clock authority failed")?;

    info!("Clock authority shutdown complete");
    Ok(())
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    // Load configuration
    let config =
        load_configuration(config_path.as_deref()).context("Failed to load configuration")?;

    // Initialize logging; the guard flushes file output on exit
    let _log_guard = initialize_logging_with_config(&config.logging)?;
    info!("Starting Session Control Plane v{}", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.metrics.port)))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics available on port {}", config.metrics.port);
    }

    // Setup signal handlers for graceful shutdown
    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone())?;
    info!("Signal handlers configured");

    let limit = config.service.shutdown_timeout();
    let state = Arc::new(ServiceState::new(config, shutdown.clone()).await?);
    info!("Service state initialized ({:?})", state.health_check());

    let runner = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            match state.run().await {
                Ok(report) => {
                    for controllable in &report.controllables {
                        info!(
                            "Controllable {}: {} updates, {} sessions closed",
                            controllable.id, controllable.updates, controllable.sessions_closed
                        );
                    }
                }
                Err(e) => error!("Session run failed: {:#}", e),
            }
            state.shutdown.cancel();
        })
    };

    info!("Session Control Plane is running. Press Ctrl+C to shutdown gracefully.");
    shutdown.cancelled().await;

    graceful_shutdown(&shutdown, vec![("Session run".to_string(), runner)], limit).await;
    info!("Session Control Plane shutdown complete");
    Ok(())
}
