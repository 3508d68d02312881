//! Local container metadata endpoints daemon.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;

mod config;
mod metadata;
mod resolver;
mod runtime;
mod server;
mod types;

use config::Config;
use metadata::MetadataService;
use runtime::DockerRuntime;
use server::{run_metadata_server, supervise, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting local endpoints with config: {:?}", cfg);

    // Malformed tags are fatal: never serve with a partial tag set.
    let metadata = MetadataService::new(&cfg.container_instance_tags, &cfg.task_tags)
        .map_err(|e| anyhow::anyhow!("Invalid tag configuration: {}", e))?
        .with_task(cfg.task_info());
    info!(
        "Loaded {} container instance tags and {} task tags",
        metadata.container_instance_tags().len(),
        metadata.task_tags().len()
    );

    // Container Runtime (Docker)
    let runtime = DockerRuntime::connect()?;

    let state = Arc::new(AppState {
        runtime: Arc::new(runtime),
        metadata,
        self_ref: cfg.self_ref(),
    });

    // HTTP Server
    let server_handle = tokio::spawn(run_metadata_server(cfg.bind_addr(), state));

    // Graceful Shutdown, or exit if the server stops on its own
    supervise(server_handle, shutdown_signal()).await?;

    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }
}
