use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

/// Probe-derived health of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    Unhealthy,
    /// No probe verdict yet. Still routable.
    Checking,
}

impl NodeHealth {
    pub fn is_routable(self) -> bool {
        self != NodeHealth::Unhealthy
    }
}

/// Descriptive node attributes carried through from discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

/// A node as described by configuration or a discovery provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

fn default_weight() -> u32 {
    1
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            weight: default_weight(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A service instance known to the router, with its live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: String,
    pub url: String,
    pub health: NodeHealth,
    pub last_health_check: Option<SystemTime>,
    /// In-flight requests. Only the router changes this.
    pub connections: u32,
    pub weight: u32,
    pub metadata: NodeMetadata,
}

impl ServiceNode {
    pub fn from_spec(spec: NodeSpec) -> Self {
        Self {
            id: spec.id,
            url: spec.url,
            health: NodeHealth::Checking,
            last_health_check: None,
            connections: 0,
            weight: spec.weight.max(1),
            metadata: spec.metadata,
        }
    }

    /// Refresh the descriptive fields from a newer [`NodeSpec`], keeping live state.
    pub fn update_from_spec(&mut self, spec: &NodeSpec) {
        self.url = spec.url.clone();
        self.weight = spec.weight.max(1);
        self.metadata = spec.metadata.clone();
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.metadata.capabilities.contains(capability)
    }
}
