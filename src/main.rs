use std::sync::Arc;

use anyhow::{Error, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dlq_archiver::api;
use dlq_archiver::archive::ArchiveWriter;
use dlq_archiver::clients::bus::{BusAdminApi, BusClient};
use dlq_archiver::clients::memory::{InMemoryBus, InMemoryStore};
use dlq_archiver::config::Config;
use dlq_archiver::manager::LifecycleManager;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    info!(scope = ?config.entity_scope, "Configuration validated");

    // Smoke mode: in-memory bus and store. Production deployments wire the
    // broker and object-store SDK adapters behind the same traits.
    let bus = Arc::new(InMemoryBus::new());
    let admin: Arc<dyn BusAdminApi> = bus.clone();
    let client: Arc<dyn BusClient> = bus;
    let writer = Arc::new(ArchiveWriter::new(Arc::new(InMemoryStore::new())));

    let mut manager = LifecycleManager::new(admin, client, writer, &config);

    let status = manager.status();
    let api_config = config.clone();
    tokio::spawn(async move {
        if let Err(e) = api::run_api_server(api_config, status).await {
            warn!(error = %e, "Health check server exited");
        }
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    manager.run(stop_rx).await
}
