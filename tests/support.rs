use std::future::Future;
use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};

use dlq_archiver::archive::ArchiveWriter;
use dlq_archiver::clients::bus::{BusAdminApi, BusClient};
use dlq_archiver::clients::memory::InMemoryStore;
use dlq_archiver::clients::storage::StorageClient;
use dlq_archiver::config::{Config, EntityScope};
use dlq_archiver::manager::{LifecycleManager, LifecycleState, ManagerStatus};

pub fn test_config(entity_scope: EntityScope) -> Config {
    Config {
        bus_connection_string: "Endpoint=sb://in-memory".to_string(),
        storage_connection_string: "UseDevelopmentStorage=true".to_string(),
        container_name: "deadletters".to_string(),
        entity_scope,
        prefetch_count: 10,
        page_size_hint: 10,
        server_port: 0,
    }
}

/// An archiver running on a background task, with handles for the tests to
/// signal shutdown and observe lifecycle state.
pub struct RunningArchiver {
    stop: watch::Sender<bool>,
    status: watch::Receiver<ManagerStatus>,
    task: JoinHandle<Result<(), Error>>,
}

impl RunningArchiver {
    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    pub fn consumers(&self) -> usize {
        self.status.borrow().consumers
    }

    /// Status observer that outlives the archiver handle.
    pub fn status_receiver(&self) -> watch::Receiver<ManagerStatus> {
        self.status.clone()
    }

    pub async fn shutdown(self) -> Result<(), Error> {
        let _ = self.stop.send(true);
        self.task.await?
    }
}

pub fn spawn_archiver(
    admin: Arc<dyn BusAdminApi>,
    bus: Arc<dyn BusClient>,
    store: Arc<dyn StorageClient>,
    config: Config,
) -> RunningArchiver {
    let writer = Arc::new(ArchiveWriter::new(store));
    let mut manager = LifecycleManager::new(admin, bus, writer, &config);
    let status = manager.status();
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move { manager.run(stop_rx).await });

    RunningArchiver { stop, status, task }
}

/// Poll an async condition until it holds, failing the test after 5 seconds.
pub async fn wait_until<F, Fut>(description: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        if Instant::now() > deadline {
            panic!("Timed out waiting for {description}");
        }
        sleep(Duration::from_millis(25)).await;
    }
}

/// Storage that fails a fixed number of uploads before behaving normally,
/// for exercising broker-driven redelivery after archive failures.
pub struct FlakyStore {
    inner: InMemoryStore,
    failures_left: Mutex<u32>,
}

impl FlakyStore {
    pub fn failing_first(failures: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures_left: Mutex::new(failures),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl StorageClient for FlakyStore {
    async fn ensure_container(&self) -> Result<(), Error> {
        self.inner.ensure_container().await
    }

    async fn upload(&self, blob_name: &str, bytes: &[u8]) -> Result<(), Error> {
        let mut failures_left = self.failures_left.lock().await;
        if *failures_left > 0 {
            *failures_left -= 1;
            return Err(anyhow!("Transient storage failure"));
        }
        drop(failures_left);

        self.inner.upload(blob_name, bytes).await
    }
}
