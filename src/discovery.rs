use anyhow::{Error, Result};
use tracing::{debug, info};

use crate::clients::bus::BusAdminApi;
use crate::config::EntityScope;
use crate::models::source::DeadLetterSource;

/// Enumerate every addressable dead-letter source for the configured scope,
/// following pagination until the listing is exhausted. Any administrative
/// failure here is fatal for startup.
pub async fn discover_sources(
    admin: &dyn BusAdminApi,
    scope: EntityScope,
    page_size_hint: u32,
) -> Result<Vec<DeadLetterSource>, Error> {
    let sources = match scope {
        EntityScope::Queues => discover_queues(admin, page_size_hint).await?,
        EntityScope::Subscriptions => discover_subscriptions(admin, page_size_hint).await?,
    };

    info!(count = sources.len(), scope = ?scope, "Entity discovery completed");
    Ok(sources)
}

async fn discover_queues(
    admin: &dyn BusAdminApi,
    page_size_hint: u32,
) -> Result<Vec<DeadLetterSource>, Error> {
    let mut sources = Vec::new();
    let mut continuation = None;

    loop {
        let page = admin.get_queues(continuation, page_size_hint).await?;
        debug!(items = page.items.len(), "Fetched queue listing page");
        for name in page.items {
            sources.push(DeadLetterSource::queue(name));
        }

        continuation = page.continuation;
        if continuation.is_none() {
            break;
        }
    }

    Ok(sources)
}

async fn discover_subscriptions(
    admin: &dyn BusAdminApi,
    page_size_hint: u32,
) -> Result<Vec<DeadLetterSource>, Error> {
    let mut sources = Vec::new();
    let mut topic_continuation = None;

    loop {
        let topics = admin.get_topics(topic_continuation, page_size_hint).await?;
        debug!(items = topics.items.len(), "Fetched topic listing page");

        for topic_name in &topics.items {
            let mut continuation = None;
            loop {
                let subscriptions = admin
                    .get_subscriptions(topic_name, continuation, page_size_hint)
                    .await?;
                for subscription_name in subscriptions.items {
                    sources.push(DeadLetterSource::subscription(
                        topic_name.clone(),
                        subscription_name,
                    ));
                }

                continuation = subscriptions.continuation;
                if continuation.is_none() {
                    break;
                }
            }
        }

        topic_continuation = topics.continuation;
        if topic_continuation.is_none() {
            break;
        }
    }

    Ok(sources)
}
