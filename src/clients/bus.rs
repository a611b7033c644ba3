//! Broker boundary. The wire protocol lives behind these traits so the
//! archiver can run against any bus SDK (or the in-memory bus in tests).

use std::collections::HashMap;

use anyhow::{Error, Result};
use async_trait::async_trait;
use mockall::automock;

/// One page of an administrative listing. `continuation` is `None` once the
/// listing is exhausted.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<String>,
    pub continuation: Option<String>,
}

/// Opaque completion token for a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A message delivered from a dead-letter path. Stays on the broker until
/// `complete` is called with its receipt.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub subject: Option<String>,
    pub body: Vec<u8>,
    pub application_properties: HashMap<String, serde_json::Value>,
    pub receipt: Receipt,
}

/// Paginated administrative listing of broker entities.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BusAdminApi: Send + Sync {
    async fn get_queues(
        &self,
        continuation: Option<String>,
        page_size: u32,
    ) -> Result<Page, Error>;

    async fn get_topics(
        &self,
        continuation: Option<String>,
        page_size: u32,
    ) -> Result<Page, Error>;

    async fn get_subscriptions(
        &self,
        topic_name: &str,
        continuation: Option<String>,
        page_size: u32,
    ) -> Result<Page, Error>;
}

/// Connection-level handle used to open receivers against broker sub-paths.
/// Shared read-only across consumer creation; each receiver is owned
/// exclusively by its consumer once created.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn create_receiver(
        &self,
        path: &str,
        prefetch: u16,
    ) -> Result<Box<dyn BusReceiver>, Error>;

    async fn close(&self) -> Result<(), Error>;
}

/// Destructive-receive stream over one dead-letter path. Messages are removed
/// from the broker only on explicit `complete`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BusReceiver: Send + Sync {
    /// Next available message, or `None` when the path is currently empty.
    async fn receive(&self) -> Result<Option<ReceivedMessage>, Error>;

    async fn complete(&self, receipt: &Receipt) -> Result<(), Error>;

    async fn close(&self) -> Result<(), Error>;
}
