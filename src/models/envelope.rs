use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::clients::bus::ReceivedMessage;

pub const MESSAGE_ID_HEADER: &str = "MessageId";
pub const SUBJECT_HEADER: &str = "Subject";

/// Normalized form of a dead-lettered message, independent of the broker's
/// native message type. Built once per received message, never mutated.
///
/// `headers` always carries `MessageId` and `Subject`, plus every non-null
/// application property stringified. `body` is serialized as base64 so the
/// archived document stays valid JSON for binary payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub headers: HashMap<String, String>,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
}

impl MessageEnvelope {
    pub fn from_received(message: &ReceivedMessage) -> Self {
        let mut headers = HashMap::new();
        headers.insert(MESSAGE_ID_HEADER.to_string(), message.message_id.clone());
        headers.insert(
            SUBJECT_HEADER.to_string(),
            message.subject.clone().unwrap_or_default(),
        );

        for (key, value) in &message.application_properties {
            if value.is_null() {
                continue;
            }
            // Application properties never displace the reserved headers.
            headers
                .entry(key.clone())
                .or_insert_with(|| stringify(value));
        }

        Self {
            headers,
            body: message.body.clone(),
        }
    }

    pub fn message_id(&self) -> &str {
        self.headers
            .get(MESSAGE_ID_HEADER)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

mod body_base64 {
    use base64::{Engine as _, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        general_purpose::STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
