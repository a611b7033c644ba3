use serde::{Deserialize, Serialize};

/// One origin of dead-lettered messages, fixed at discovery time.
///
/// The variant determines both the broker-side dead-letter path and the
/// archive path for every message drained from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterSource {
    Queue {
        name: String,
    },
    TopicSubscription {
        topic_name: String,
        subscription_name: String,
    },
}

impl DeadLetterSource {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue { name: name.into() }
    }

    pub fn subscription(topic_name: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        Self::TopicSubscription {
            topic_name: topic_name.into(),
            subscription_name: subscription_name.into(),
        }
    }

    /// Unique registry key for this source.
    pub fn registry_key(&self) -> String {
        match self {
            Self::Queue { name } => name.clone(),
            Self::TopicSubscription {
                topic_name,
                subscription_name,
            } => format!("{}-{}", topic_name, subscription_name),
        }
    }

    /// Broker sub-path of this source's dead-letter queue.
    pub fn dead_letter_path(&self) -> String {
        match self {
            Self::Queue { name } => format!("{}/$DeadLetterQueue", name),
            Self::TopicSubscription {
                topic_name,
                subscription_name,
            } => format!(
                "{}/Subscriptions/{}/$DeadLetterQueue",
                topic_name, subscription_name
            ),
        }
    }

    /// Archive object path for a message drained from this source.
    ///
    /// Stable per (source, message id), so re-archiving the same message
    /// overwrites instead of duplicating.
    pub fn blob_name(&self, message_id: &str) -> String {
        match self {
            Self::Queue { name } => format!("{}/{}.json", name, message_id),
            Self::TopicSubscription {
                topic_name,
                subscription_name,
            } => format!(
                "topics/{}/{}/{}.json",
                topic_name, subscription_name, message_id
            ),
        }
    }
}

impl std::fmt::Display for DeadLetterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queue { name } => write!(f, "{}", name),
            Self::TopicSubscription {
                topic_name,
                subscription_name,
            } => write!(f, "{}/{}", topic_name, subscription_name),
        }
    }
}
