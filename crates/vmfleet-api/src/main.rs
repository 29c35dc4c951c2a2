//! vmfleet server

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vmfleet_api::{AppState, routes};
use vmfleet_config::load_system_config;
use vmfleet_provisioner::{OrkaProvisioner, Provisioner};
use vmfleet_scheduler::{Coordinator, JanitorConfig, StartWorker, StopWorker, spawn_janitor};

#[derive(Parser)]
#[command(name = "vmfleet-server")]
#[command(about = "Ephemeral VM runners for GitHub Actions workflow jobs", long_about = None)]
struct Cli {
    /// Path to the KDL configuration file
    #[arg(short, long, env = "VMFLEET_CONFIG", default_value = "vmfleet.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_system_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let provisioner = OrkaProvisioner::new(
        config.orka.base_url.clone(),
        config.orka.token.clone(),
        config.orka.request_timeout,
    )?;
    info!(
        backend = provisioner.name(),
        url = %config.orka.base_url,
        capacity = config.fleet.capacity,
        "Provisioner ready"
    );

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(provisioner),
        config.fleet.capacity,
    ));
    let shutdown = CancellationToken::new();

    let start_worker = StartWorker::new(coordinator.clone(), &config.fleet, config.images.clone());
    let stop_worker = StopWorker::new(coordinator.clone(), &config.fleet);
    let tasks = vec![
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { start_worker.run(shutdown).await }
        }),
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move { stop_worker.run(shutdown).await }
        }),
        spawn_janitor(
            coordinator.clone(),
            JanitorConfig::from(&config.fleet),
            shutdown.clone(),
        ),
    ];

    let state = AppState::new(coordinator, config.github.webhook_secret.as_str());
    let app = routes::router(state, config.server.expose_status).layer(TraceLayer::new_for_http());

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // The server can also stop on its own; make sure the workers follow.
    shutdown.cancel();
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            error!(error = %e, "Background task failed");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        }
        _ = shutdown.cancelled() => {}
    }

    info!("Shutting down");
    shutdown.cancel();
}
