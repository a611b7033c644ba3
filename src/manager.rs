use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Error, Result};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::archive::ArchiveWriter;
use crate::clients::bus::{BusAdminApi, BusClient};
use crate::config::{Config, EntityScope};
use crate::consumer::{ConsumerHandle, DeadLetterConsumer};
use crate::discovery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Discovering,
    Running,
    Draining,
    Stopped,
}

/// Snapshot of the manager published to observers (the health API).
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub state: LifecycleState,
    pub consumers: usize,
}

/// Orchestrates the whole sweep: container bootstrap, one-shot entity
/// discovery, one consumer per source, and the drain on shutdown. The
/// registry is mutated only here, on this task.
pub struct LifecycleManager {
    admin: Arc<dyn BusAdminApi>,
    bus: Arc<dyn BusClient>,
    writer: Arc<ArchiveWriter>,
    scope: EntityScope,
    prefetch_count: u16,
    page_size_hint: u32,
    registry: HashMap<String, ConsumerHandle>,
    status: watch::Sender<ManagerStatus>,
    root_shutdown: watch::Sender<bool>,
}

impl LifecycleManager {
    pub fn new(
        admin: Arc<dyn BusAdminApi>,
        bus: Arc<dyn BusClient>,
        writer: Arc<ArchiveWriter>,
        config: &Config,
    ) -> Self {
        let (status, _) = watch::channel(ManagerStatus {
            state: LifecycleState::Created,
            consumers: 0,
        });
        let (root_shutdown, _) = watch::channel(false);

        Self {
            admin,
            bus,
            writer,
            scope: config.entity_scope,
            prefetch_count: config.prefetch_count,
            page_size_hint: config.page_size_hint,
            registry: HashMap::new(),
            status,
            root_shutdown,
        }
    }

    /// Observer handle for the current lifecycle state and consumer count.
    pub fn status(&self) -> watch::Receiver<ManagerStatus> {
        self.status.subscribe()
    }

    /// Run until `stop` signals shutdown, then drain every consumer and
    /// release the bus connection. Configuration and discovery failures
    /// abort before `Running`; everything later is contained and logged.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> Result<(), Error> {
        let started = tokio::select! {
            result = self.start_up() => {
                match result {
                    Ok(()) => true,
                    Err(e) => {
                        self.drain().await;
                        return Err(e);
                    }
                }
            }
            _ = stop_requested(&mut stop) => false,
        };

        if started {
            self.publish(LifecycleState::Running);
            stop_requested(&mut stop).await;
        }

        self.drain().await;
        Ok(())
    }

    async fn start_up(&mut self) -> Result<(), Error> {
        self.publish(LifecycleState::Discovering);

        self.writer.bootstrap().await?;

        let sources =
            discovery::discover_sources(self.admin.as_ref(), self.scope, self.page_size_hint)
                .await?;

        for source in sources {
            let key = source.registry_key();
            if self.registry.contains_key(&key) {
                debug!(source = %source, "Source already registered, skipping duplicate");
                continue;
            }

            match DeadLetterConsumer::start(
                Arc::clone(&self.bus),
                Arc::clone(&self.writer),
                source.clone(),
                self.prefetch_count,
                self.root_shutdown.subscribe(),
            )
            .await
            {
                Ok(handle) => {
                    self.registry.insert(key, handle);
                }
                Err(e) => {
                    // One source failing to attach does not affect the rest.
                    warn!(source = %source, error = %e, "Failed to start dead-letter consumer, skipping source");
                }
            }
        }

        Ok(())
    }

    /// Stop every registered consumer, clear the registry, and close the bus
    /// connection. Best-effort: individual stop failures are logged and the
    /// manager always reaches `Stopped`.
    async fn drain(&mut self) {
        self.publish(LifecycleState::Draining);

        let _ = self.root_shutdown.send(true);

        // No ordering dependency between sources; stop them all at once.
        let handles: Vec<ConsumerHandle> = self
            .registry
            .drain()
            .map(|(key, handle)| {
                debug!(source = %key, "Stopping dead-letter consumer");
                handle
            })
            .collect();
        join_all(handles.into_iter().map(DeadLetterConsumer::stop)).await;

        if let Err(e) = self.bus.close().await {
            warn!(error = %e, "Failed to close bus client");
        }

        self.publish(LifecycleState::Stopped);
    }

    fn publish(&self, state: LifecycleState) {
        let consumers = self.registry.len();
        let _ = self.status.send(ManagerStatus { state, consumers });
        info!(state = ?state, consumers, "Lifecycle state changed");
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        // A dropped sender counts as a stop request.
        if stop.changed().await.is_err() {
            return;
        }
    }
}
