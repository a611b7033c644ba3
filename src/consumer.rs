use std::sync::Arc;

use anyhow::{Error, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use crate::archive::ArchiveWriter;
use crate::clients::bus::{BusClient, BusReceiver, ReceivedMessage};
use crate::models::envelope::MessageEnvelope;
use crate::models::source::DeadLetterSource;

/// How long the receive loop idles when the dead-letter path is empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runtime record for one running consumer, owned exclusively by the
/// lifecycle manager.
pub struct ConsumerHandle {
    pub source: DeadLetterSource,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct DeadLetterConsumer;

impl DeadLetterConsumer {
    /// Attach a receiver to the source's dead-letter path and spawn its
    /// receive-archive-complete loop. A failure to attach is a per-source
    /// start failure; the caller decides whether to skip the source.
    pub async fn start(
        bus: Arc<dyn BusClient>,
        writer: Arc<ArchiveWriter>,
        source: DeadLetterSource,
        prefetch: u16,
        root_shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerHandle, Error> {
        let path = source.dead_letter_path();
        let receiver = bus.create_receiver(&path, prefetch).await?;

        let (shutdown, own_shutdown) = watch::channel(false);
        let loop_source = source.clone();
        let task = tokio::spawn(run_loop(
            receiver,
            writer,
            loop_source,
            root_shutdown,
            own_shutdown,
        ));

        info!(source = %source, path = %path, "Started listening to dead-letter queue");

        Ok(ConsumerHandle {
            source,
            shutdown,
            task,
        })
    }

    /// Signal the consumer to drain and wait for its loop to finish. Safe to
    /// call on a consumer whose loop has already stopped.
    pub async fn stop(handle: ConsumerHandle) {
        // The loop may already have exited; a closed channel is fine.
        let _ = handle.shutdown.send(true);

        if let Err(e) = handle.task.await {
            warn!(source = %handle.source, error = %e, "Consumer task ended abnormally during stop");
        } else {
            info!(source = %handle.source, "Dead-letter consumer stopped");
        }
    }
}

async fn run_loop(
    receiver: Box<dyn BusReceiver>,
    writer: Arc<ArchiveWriter>,
    source: DeadLetterSource,
    mut root_shutdown: watch::Receiver<bool>,
    mut own_shutdown: watch::Receiver<bool>,
) {
    loop {
        // In-flight message handling is never interrupted: the shutdown
        // branches are only taken between messages.
        tokio::select! {
            changed = root_shutdown.changed() => {
                // A dropped sender counts as a shutdown signal.
                if changed.is_err() || *root_shutdown.borrow() {
                    break;
                }
            }
            changed = own_shutdown.changed() => {
                if changed.is_err() || *own_shutdown.borrow() {
                    break;
                }
            }
            received = receiver.receive() => match received {
                Ok(Some(message)) => {
                    handle_message(receiver.as_ref(), &writer, &source, message).await;
                }
                Ok(None) => {
                    sleep(IDLE_POLL_INTERVAL).await;
                }
                Err(e) => {
                    // Stream-level errors (transient faults, entity deleted
                    // concurrently) are logged and the loop keeps running.
                    // TODO: deregister the consumer when its source is gone.
                    warn!(source = %source, error = %e, "Error receiving from dead-letter path");
                    sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    }

    if let Err(e) = receiver.close().await {
        warn!(source = %source, error = %e, "Failed to close dead-letter receiver");
    }
}

/// Archive the message, then complete it on the broker. Completion happens
/// only after the write confirms; a failed write leaves the message to the
/// broker's own redelivery policy.
async fn handle_message(
    receiver: &dyn BusReceiver,
    writer: &ArchiveWriter,
    source: &DeadLetterSource,
    message: ReceivedMessage,
) {
    let envelope = MessageEnvelope::from_received(&message);

    match writer.write(source, &envelope).await {
        Ok(()) => {
            if let Err(e) = receiver.complete(&message.receipt).await {
                warn!(
                    source = %source,
                    message_id = %message.message_id,
                    error = %e,
                    "Archived message could not be completed; broker will redeliver"
                );
            }
        }
        Err(e) => {
            error!(
                source = %source,
                message_id = %message.message_id,
                error = %e,
                "Failed to archive dead-letter message; leaving it unacknowledged"
            );
        }
    }
}
