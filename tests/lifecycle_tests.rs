use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::watch;

use dlq_archiver::archive::ArchiveWriter;
use dlq_archiver::clients::bus::{MockBusAdminApi, Page};
use dlq_archiver::clients::memory::{InMemoryBus, InMemoryStore};
use dlq_archiver::config::EntityScope;
use dlq_archiver::manager::{LifecycleManager, LifecycleState};
use dlq_archiver::models::source::DeadLetterSource;

use crate::support::{spawn_archiver, test_config, wait_until};

/// Test: Overlapping discovery pages produce exactly one consumer per
/// distinct source.
#[tokio::test]
async fn overlapping_pages_register_each_source_once() -> Result<()> {
    let mut admin = MockBusAdminApi::new();
    admin
        .expect_get_queues()
        .withf(|continuation, _| continuation.is_none())
        .times(1)
        .returning(|_, _| {
            Ok(Page {
                items: vec!["orders".to_string(), "billing".to_string()],
                continuation: Some("2".to_string()),
            })
        });
    admin
        .expect_get_queues()
        .withf(|continuation, _| continuation.is_some())
        .times(1)
        .returning(|_, _| {
            Ok(Page {
                items: vec!["billing".to_string(), "orders".to_string()],
                continuation: None,
            })
        });

    let bus = Arc::new(InMemoryBus::new());
    bus.declare_queue("orders").await;
    bus.declare_queue("billing").await;

    let store = Arc::new(InMemoryStore::new());
    let archiver = spawn_archiver(
        Arc::new(admin),
        bus.clone(),
        store,
        test_config(EntityScope::Queues),
    );

    wait_until("archiver running", {
        let archiver = &archiver;
        move || {
            let state = archiver.state();
            async move { state == LifecycleState::Running }
        }
    })
    .await;

    assert_eq!(archiver.consumers(), 2);

    archiver.shutdown().await?;
    Ok(())
}

/// Test: A source that fails to attach is skipped; the rest keep running.
#[tokio::test]
async fn start_failure_for_one_source_skips_only_that_source() -> Result<()> {
    let mut admin = MockBusAdminApi::new();
    admin.expect_get_queues().times(1).returning(|_, _| {
        Ok(Page {
            // "ghost" is listed by the admin API but no longer exists on
            // the bus, as if deleted between discovery and attach.
            items: vec!["orders".to_string(), "ghost".to_string()],
            continuation: None,
        })
    });

    let bus = Arc::new(InMemoryBus::new());
    bus.declare_queue("orders").await;

    let store = Arc::new(InMemoryStore::new());
    let archiver = spawn_archiver(
        Arc::new(admin),
        bus.clone(),
        store,
        test_config(EntityScope::Queues),
    );

    wait_until("archiver running", {
        let archiver = &archiver;
        move || {
            let state = archiver.state();
            async move { state == LifecycleState::Running }
        }
    })
    .await;

    assert_eq!(archiver.consumers(), 1);

    archiver.shutdown().await?;
    Ok(())
}

/// Test: Discovery failure aborts startup; the manager still reaches
/// Stopped and releases the bus connection.
#[tokio::test]
async fn discovery_failure_aborts_before_running() -> Result<()> {
    let mut admin = MockBusAdminApi::new();
    admin
        .expect_get_queues()
        .times(1)
        .returning(|_, _| Err(anyhow!("Unauthorized")));

    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new());
    let writer = Arc::new(ArchiveWriter::new(store));

    let mut manager = LifecycleManager::new(
        Arc::new(admin),
        bus.clone(),
        writer,
        &test_config(EntityScope::Queues),
    );
    let status = manager.status();

    let (_stop, stop_rx) = watch::channel(false);
    let result = manager.run(stop_rx).await;

    assert!(result.is_err());
    assert_eq!(status.borrow().state, LifecycleState::Stopped);
    assert!(bus.is_closed().await);
    Ok(())
}

/// Test: After a stop signal every consumer is stopped, the registry is
/// empty, and the bus connection is released.
#[tokio::test]
async fn shutdown_stops_every_consumer_and_clears_registry() -> Result<()> {
    let bus = Arc::new(InMemoryBus::new());
    bus.declare_queue("orders").await;
    bus.declare_queue("billing").await;

    let store = Arc::new(InMemoryStore::new());
    let archiver = spawn_archiver(
        bus.clone(),
        bus.clone(),
        store.clone(),
        test_config(EntityScope::Queues),
    );

    wait_until("both consumers running", {
        let archiver = &archiver;
        move || {
            let state = archiver.state();
            let consumers = archiver.consumers();
            async move { state == LifecycleState::Running && consumers == 2 }
        }
    })
    .await;

    let status = archiver.status_receiver();
    archiver.shutdown().await?;

    assert_eq!(status.borrow().state, LifecycleState::Stopped);
    assert_eq!(status.borrow().consumers, 0);
    assert!(bus.is_closed().await);

    // Messages dead-lettered after shutdown stay put: nothing consumes them.
    let source = DeadLetterSource::queue("orders");
    bus.dead_letter(&source, "late", None, b"late", HashMap::new())
        .await?;
    tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;
    assert_eq!(bus.outstanding(&source).await, 1);
    assert_eq!(store.blob_count().await, 0);
    Ok(())
}

/// Test: A stop signal sent before startup finishes still drains cleanly.
#[tokio::test]
async fn stop_signal_during_startup_reaches_stopped() -> Result<()> {
    let bus = Arc::new(InMemoryBus::new());
    bus.declare_queue("orders").await;

    let store = Arc::new(InMemoryStore::new());
    let archiver = spawn_archiver(
        bus.clone(),
        bus.clone(),
        store,
        test_config(EntityScope::Queues),
    );

    // Without waiting for Running.
    archiver.shutdown().await?;
    assert!(bus.is_closed().await);
    Ok(())
}
