//! Network creation.

use super::Result;
use crate::engine::{Engine, NetworkInfo, NetworkOptions};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A network as created by the engine. Cheap to clone and share between
/// container configurations.
#[derive(Clone)]
pub struct Network {
    info: Arc<NetworkInfo>,
    engine: Arc<dyn Engine>,
}

impl Network {
    pub fn id(&self) -> &str {
        &self.info.id
    }

    /// Engine-assigned name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Driver as reported by the engine, including defaults it applied.
    pub fn driver(&self) -> &str {
        &self.info.driver
    }

    pub fn enable_ipv6(&self) -> bool {
        self.info.enable_ipv6
    }

    pub fn info(&self) -> &NetworkInfo {
        &self.info
    }

    /// Remove the network from the engine. Containers still attached make
    /// this fail.
    pub async fn remove(self) -> Result<()> {
        self.engine.remove_network(&self.info.id).await
    }
}

impl PartialEq for Network {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("driver", &self.info.driver)
            .field("enable_ipv6", &self.info.enable_ipv6)
            .finish()
    }
}

/// Create a fresh, uniquely named network.
pub async fn create_network(engine: Arc<dyn Engine>, options: NetworkOptions) -> Result<Network> {
    let name = format!("{}-{}", engine.name_prefix(), Uuid::new_v4());
    let info = engine.create_network(&name, &options).await?;

    info!(
        network = %info.name,
        driver = %info.driver,
        ipv6 = info.enable_ipv6,
        "Created network"
    );

    Ok(Network {
        info: Arc::new(info),
        engine,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    #[tokio::test]
    async fn test_defaults_come_from_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let network = create_network(engine, NetworkOptions::default()).await.unwrap();

        assert!(network.name().starts_with("testbed-"));
        assert_eq!(network.driver(), "bridge");
        assert!(!network.enable_ipv6());
    }

    #[tokio::test]
    async fn test_options_are_applied() {
        let engine = Arc::new(MemoryEngine::new());
        let options = NetworkOptions {
            enable_ipv6: Some(true),
            driver: Some("macvlan".to_string()),
        };
        let network = create_network(engine, options).await.unwrap();

        assert_eq!(network.driver(), "macvlan");
        assert!(network.enable_ipv6());
    }

    #[tokio::test]
    async fn test_each_call_creates_a_distinct_network() {
        let engine = Arc::new(MemoryEngine::new());
        let first = create_network(engine.clone(), NetworkOptions::default()).await.unwrap();
        let second = create_network(engine.clone(), NetworkOptions::default()).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(first, first.clone());

        first.remove().await.unwrap();
        assert_eq!(engine.network_count(), 1);
    }
}
