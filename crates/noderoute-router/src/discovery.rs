use async_trait::async_trait;
use noderoute_common::{DiscoveryConfig, NodeSpec, Result};

/// Source of the cluster's node list.
///
/// Called once at startup and again on every
/// [`Router::refresh_topology`](crate::Router::refresh_topology).
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    async fn discover(&self) -> Result<Vec<NodeSpec>>;
}

/// Fixed node list taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    nodes: Vec<NodeSpec>,
}

impl StaticDiscovery {
    pub fn new(nodes: Vec<NodeSpec>) -> Self {
        Self { nodes }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.static_nodes().to_vec())
    }
}

#[async_trait]
impl DiscoveryProvider for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<NodeSpec>> {
        Ok(self.nodes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_discovery() {
        let config = DiscoveryConfig::Static {
            nodes: vec![
                NodeSpec::new("a", "http://a"),
                NodeSpec::new("b", "http://b").with_weight(2),
            ],
        };
        let discovered = StaticDiscovery::from_config(&config).discover().await.unwrap();
        assert_eq!(discovered.len(), 2);
        assert_eq!(discovered[1].weight, 2);
    }
}
