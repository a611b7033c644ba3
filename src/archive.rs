use std::sync::Arc;

use anyhow::{Error, Result};
use tokio::sync::OnceCell;
use tracing::info;

use crate::clients::storage::StorageClient;
use crate::models::envelope::MessageEnvelope;
use crate::models::source::DeadLetterSource;

/// Serializes envelopes and uploads them to the object store. Performs no
/// retries; acknowledgment timing is the caller's concern.
pub struct ArchiveWriter {
    storage: Arc<dyn StorageClient>,
    container_ready: OnceCell<()>,
}

impl ArchiveWriter {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self {
            storage,
            container_ready: OnceCell::new(),
        }
    }

    /// Create the archive container if absent. The storage call runs at most
    /// once per process lifetime.
    pub async fn bootstrap(&self) -> Result<(), Error> {
        self.container_ready
            .get_or_try_init(|| async {
                self.storage.ensure_container().await?;
                info!("Archive container ready");
                Ok::<(), Error>(())
            })
            .await?;
        Ok(())
    }

    /// Archive one envelope under the path derived from its source and
    /// message id. Overwrites any object already there.
    pub async fn write(
        &self,
        source: &DeadLetterSource,
        envelope: &MessageEnvelope,
    ) -> Result<(), Error> {
        let blob_name = source.blob_name(envelope.message_id());
        let bytes = serde_json::to_vec(envelope)?;

        self.storage.upload(&blob_name, &bytes).await?;

        info!(blob = %blob_name, "Dead-letter message written to archive");
        Ok(())
    }
}
