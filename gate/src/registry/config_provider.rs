//! Tenant/connector-name → `ConnectorConfig` resolution.
//!
//! The spec specifies this only as "a runtime-config service"; SPEC_FULL
//! §C.1 names the trait boundary and an in-memory reference
//! implementation so the registry is independently testable without a
//! real configuration backend.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::connector::ConnectorConfig;

#[async_trait::async_trait]
pub trait ConnectorConfigProvider: Send + Sync {
    async fn get_config(&self, tenant: &str, connector: &str) -> Option<ConnectorConfig>;
}

/// In-memory config provider backed by a `HashMap`, suitable for tests
/// and for deployments that provision connector configuration at
/// startup rather than from a live config service.
#[derive(Default)]
pub struct StaticConnectorConfigProvider {
    configs: RwLock<HashMap<(String, String), ConnectorConfig>>,
}

impl StaticConnectorConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_config(&self, tenant: impl Into<String>, connector: impl Into<String>, config: ConnectorConfig) {
        self.configs.write().insert((tenant.into(), connector.into()), config);
    }

    pub fn remove_config(&self, tenant: &str, connector: &str) {
        self.configs.write().remove(&(tenant.to_string(), connector.to_string()));
    }
}

#[async_trait::async_trait]
impl ConnectorConfigProvider for StaticConnectorConfigProvider {
    async fn get_config(&self, tenant: &str, connector: &str) -> Option<ConnectorConfig> {
        self.configs.read().get(&(tenant.to_string(), connector.to_string())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(connector_type: &str) -> ConnectorConfig {
        ConnectorConfig {
            connector_type: connector_type.to_string(),
            endpoint: "localhost".to_string(),
            credentials: HashMap::new(),
            settings: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn returns_none_for_unknown_pair() {
        let provider = StaticConnectorConfigProvider::new();
        assert!(provider.get_config("t1", "c1").await.is_none());
    }

    #[tokio::test]
    async fn round_trips_a_set_config() {
        let provider = StaticConnectorConfigProvider::new();
        provider.set_config("t1", "c1", config("postgres"));
        let found = provider.get_config("t1", "c1").await.unwrap();
        assert_eq!(found.connector_type, "postgres");
    }

    #[tokio::test]
    async fn removed_config_is_gone() {
        let provider = StaticConnectorConfigProvider::new();
        provider.set_config("t1", "c1", config("redis"));
        provider.remove_config("t1", "c1");
        assert!(provider.get_config("t1", "c1").await.is_none());
    }
}
