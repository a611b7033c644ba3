//! Object-store boundary. The archiver only needs container bootstrap and
//! overwriting uploads addressed by an opaque path string.

use anyhow::{Error, Result};
use async_trait::async_trait;
use mockall::automock;

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create the archive container if it does not exist. Idempotent.
    async fn ensure_container(&self) -> Result<(), Error>;

    /// Upload `bytes` to `blob_name`, overwriting any existing object.
    async fn upload(&self, blob_name: &str, bytes: &[u8]) -> Result<(), Error>;
}
