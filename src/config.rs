use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

/// Which kind of broker entities discovery enumerates. One process handles
/// one scope; run two processes to sweep both.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityScope {
    Queues,
    Subscriptions,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub bus_connection_string: String,
    pub storage_connection_string: String,
    pub container_name: String,

    #[serde(default = "default_entity_scope")]
    pub entity_scope: EntityScope,

    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    #[serde(default = "default_page_size_hint")]
    pub page_size_hint: u32,

    pub server_port: u16,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|_| anyhow!("Invalid or missing environmental variable"))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        let required = [
            ("BUS_CONNECTION_STRING", &self.bus_connection_string),
            ("STORAGE_CONNECTION_STRING", &self.storage_connection_string),
            ("CONTAINER_NAME", &self.container_name),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }

        Ok(())
    }
}

fn default_entity_scope() -> EntityScope {
    EntityScope::Subscriptions
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_page_size_hint() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            bus_connection_string: "Endpoint=sb://bus".to_string(),
            storage_connection_string: "DefaultEndpointsProtocol=https".to_string(),
            container_name: "deadletters".to_string(),
            entity_scope: EntityScope::Queues,
            prefetch_count: default_prefetch_count(),
            page_size_hint: default_page_size_hint(),
            server_port: 8080,
        }
    }

    #[test]
    fn complete_config_passes_validation() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn blank_connection_string_is_rejected() {
        let mut config = config();
        config.bus_connection_string = "   ".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_container_name_is_rejected() {
        let mut config = config();
        config.container_name = String::new();

        assert!(config.validate().is_err());
    }
}
