//! In-memory bus and object store. Backs the integration tests and the
//! binary's smoke mode; production SDK adapters plug in behind the same
//! traits.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::clients::bus::{BusAdminApi, BusClient, BusReceiver, Page, Receipt, ReceivedMessage};
use crate::clients::storage::StorageClient;
use crate::models::source::DeadLetterSource;

/// How long a delivered-but-uncompleted message stays locked before the bus
/// makes it available again, standing in for broker-side lock expiry.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

struct PendingDelivery {
    message: ReceivedMessage,
    delivered_at: Instant,
}

#[derive(Default)]
struct BusState {
    queues: Vec<String>,
    topics: Vec<(String, Vec<String>)>,
    dead_letters: HashMap<String, VecDeque<ReceivedMessage>>,
    pending: HashMap<String, Vec<PendingDelivery>>,
    closed: bool,
}

pub struct InMemoryBus {
    state: Arc<Mutex<BusState>>,
    lock_timeout: Duration,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            lock_timeout,
        }
    }

    pub async fn declare_queue(&self, name: &str) {
        let mut state = self.state.lock().await;
        let path = DeadLetterSource::queue(name).dead_letter_path();
        state.queues.push(name.to_string());
        state.dead_letters.entry(path).or_default();
    }

    pub async fn declare_subscription(&self, topic_name: &str, subscription_name: &str) {
        let mut state = self.state.lock().await;
        let path = DeadLetterSource::subscription(topic_name, subscription_name).dead_letter_path();
        match state
            .topics
            .iter_mut()
            .find(|(topic, _)| topic == topic_name)
        {
            Some((_, subscriptions)) => subscriptions.push(subscription_name.to_string()),
            None => state
                .topics
                .push((topic_name.to_string(), vec![subscription_name.to_string()])),
        }
        state.dead_letters.entry(path).or_default();
    }

    /// Place a message on a declared source's dead-letter queue.
    pub async fn dead_letter(
        &self,
        source: &DeadLetterSource,
        message_id: &str,
        subject: Option<&str>,
        body: &[u8],
        application_properties: HashMap<String, serde_json::Value>,
    ) -> Result<(), Error> {
        let path = source.dead_letter_path();
        let mut state = self.state.lock().await;
        let queue = state
            .dead_letters
            .get_mut(&path)
            .ok_or_else(|| anyhow!("Entity not found: {path}"))?;

        queue.push_back(ReceivedMessage {
            message_id: message_id.to_string(),
            subject: subject.map(str::to_string),
            body: body.to_vec(),
            application_properties,
            receipt: Receipt::new(uuid::Uuid::new_v4().to_string()),
        });

        Ok(())
    }

    /// Messages still owned by the broker for a source: queued plus
    /// delivered-but-uncompleted.
    pub async fn outstanding(&self, source: &DeadLetterSource) -> usize {
        let path = source.dead_letter_path();
        let state = self.state.lock().await;
        let queued = state.dead_letters.get(&path).map_or(0, VecDeque::len);
        let pending = state.pending.get(&path).map_or(0, Vec::len);
        queued + pending
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

fn page_of(items: &[String], continuation: Option<String>, page_size: u32) -> Result<Page, Error> {
    let start = match continuation {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| anyhow!("Invalid continuation token: {token}"))?,
        None => 0,
    };
    let start = start.min(items.len());
    let end = (start + page_size as usize).min(items.len());
    let continuation = (end < items.len()).then(|| end.to_string());

    Ok(Page {
        items: items[start..end].to_vec(),
        continuation,
    })
}

#[async_trait]
impl BusAdminApi for InMemoryBus {
    async fn get_queues(
        &self,
        continuation: Option<String>,
        page_size: u32,
    ) -> Result<Page, Error> {
        let state = self.state.lock().await;
        page_of(&state.queues, continuation, page_size)
    }

    async fn get_topics(
        &self,
        continuation: Option<String>,
        page_size: u32,
    ) -> Result<Page, Error> {
        let state = self.state.lock().await;
        let topics: Vec<String> = state.topics.iter().map(|(topic, _)| topic.clone()).collect();
        page_of(&topics, continuation, page_size)
    }

    async fn get_subscriptions(
        &self,
        topic_name: &str,
        continuation: Option<String>,
        page_size: u32,
    ) -> Result<Page, Error> {
        let state = self.state.lock().await;
        let subscriptions = state
            .topics
            .iter()
            .find(|(topic, _)| topic == topic_name)
            .map(|(_, subscriptions)| subscriptions.clone())
            .ok_or_else(|| anyhow!("Topic not found: {topic_name}"))?;
        page_of(&subscriptions, continuation, page_size)
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn create_receiver(
        &self,
        path: &str,
        _prefetch: u16,
    ) -> Result<Box<dyn BusReceiver>, Error> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(anyhow!("Bus client is closed"));
        }
        if !state.dead_letters.contains_key(path) {
            return Err(anyhow!("Entity not found: {path}"));
        }

        Ok(Box::new(InMemoryReceiver {
            state: Arc::clone(&self.state),
            path: path.to_string(),
            lock_timeout: self.lock_timeout,
        }))
    }

    async fn close(&self) -> Result<(), Error> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

struct InMemoryReceiver {
    state: Arc<Mutex<BusState>>,
    path: String,
    lock_timeout: Duration,
}

#[async_trait]
impl BusReceiver for InMemoryReceiver {
    async fn receive(&self) -> Result<Option<ReceivedMessage>, Error> {
        let mut state = self.state.lock().await;
        let BusState {
            dead_letters,
            pending,
            ..
        } = &mut *state;

        // Expired locks put the message back in line, like broker redelivery.
        let now = Instant::now();
        if let Some(in_flight) = pending.get_mut(&self.path) {
            let mut index = 0;
            while index < in_flight.len() {
                if now.duration_since(in_flight[index].delivered_at) >= self.lock_timeout {
                    let expired = in_flight.remove(index);
                    if let Some(queue) = dead_letters.get_mut(&self.path) {
                        queue.push_back(expired.message);
                    }
                } else {
                    index += 1;
                }
            }
        }

        let queue = dead_letters
            .get_mut(&self.path)
            .ok_or_else(|| anyhow!("Entity not found: {}", self.path))?;

        match queue.pop_front() {
            Some(message) => {
                pending
                    .entry(self.path.clone())
                    .or_default()
                    .push(PendingDelivery {
                        message: message.clone(),
                        delivered_at: now,
                    });
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, receipt: &Receipt) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let in_flight = state
            .pending
            .get_mut(&self.path)
            .ok_or_else(|| anyhow!("No delivery pending for receipt {}", receipt.as_str()))?;

        let position = in_flight
            .iter()
            .position(|delivery| &delivery.message.receipt == receipt)
            .ok_or_else(|| anyhow!("Receipt not found or lock expired: {}", receipt.as_str()))?;
        in_flight.remove(position);

        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let BusState {
            dead_letters,
            pending,
            ..
        } = &mut *state;

        // Un-completed deliveries return to the queue.
        if let Some(in_flight) = pending.remove(&self.path) {
            if let Some(queue) = dead_letters.get_mut(&self.path) {
                for delivery in in_flight {
                    queue.push_back(delivery.message);
                }
            }
        }

        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    container_created: bool,
    ensure_calls: u32,
    fail_prefix: Option<String>,
    blobs: HashMap<String, Vec<u8>>,
}

pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Make uploads whose blob name starts with `prefix` fail, simulating
    /// unreachable storage. `None` clears the fault.
    pub async fn fail_uploads_matching(&self, prefix: Option<&str>) {
        self.state.lock().await.fail_prefix = prefix.map(str::to_string);
    }

    pub async fn blob(&self, blob_name: &str) -> Option<Vec<u8>> {
        self.state.lock().await.blobs.get(blob_name).cloned()
    }

    pub async fn blob_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.blobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn blob_count(&self) -> usize {
        self.state.lock().await.blobs.len()
    }

    pub async fn ensure_calls(&self) -> u32 {
        self.state.lock().await.ensure_calls
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for InMemoryStore {
    async fn ensure_container(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.ensure_calls += 1;
        state.container_created = true;
        Ok(())
    }

    async fn upload(&self, blob_name: &str, bytes: &[u8]) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if !state.container_created {
            return Err(anyhow!("Container does not exist"));
        }
        if let Some(prefix) = &state.fail_prefix {
            if blob_name.starts_with(prefix.as_str()) {
                return Err(anyhow!("Storage unreachable for blob {blob_name}"));
            }
        }
        state.blobs.insert(blob_name.to_string(), bytes.to_vec());
        Ok(())
    }
}
