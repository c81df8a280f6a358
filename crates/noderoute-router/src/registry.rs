use crate::discovery::DiscoveryProvider;
use noderoute_common::{NodeHealth, NodeSpec, Result, RouterError, ServiceNode};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::time::SystemTime;
use tracing::{info, warn};

/// Outcome of reconciling the registry with a discovered node list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TopologyChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The set of known nodes, in configured order.
///
/// Every accessor returns an owned snapshot so callers never hold the lock
/// while doing anything else.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<Vec<ServiceNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the initial node list from a discovery provider.
    pub async fn initialize(&self, discovery: &dyn DiscoveryProvider) -> Result<TopologyChange> {
        let specs = discovery.discover().await?;
        let change = self.apply(specs);
        info!(nodes = self.len(), "Node registry initialized");
        Ok(change)
    }

    /// Reconciles with `specs`: new ids are added, vanished ids removed, and
    /// surviving nodes get their url, weight and metadata refreshed while
    /// keeping health and connection counts. The result follows `specs` order.
    pub fn apply(&self, specs: Vec<NodeSpec>) -> TopologyChange {
        let mut nodes = self.nodes.write();
        let mut previous: Vec<ServiceNode> = std::mem::take(&mut *nodes);
        let mut change = TopologyChange::default();
        let mut seen = HashSet::new();

        for spec in specs {
            if !seen.insert(spec.id.clone()) {
                warn!(node_id = %spec.id, "Ignoring duplicate node id from discovery");
                continue;
            }
            match previous.iter().position(|n| n.id == spec.id) {
                Some(idx) => {
                    let mut node = previous.swap_remove(idx);
                    node.update_from_spec(&spec);
                    nodes.push(node);
                }
                None => {
                    change.added.push(spec.id.clone());
                    nodes.push(ServiceNode::from_spec(spec));
                }
            }
        }

        change.removed = previous.into_iter().map(|n| n.id).collect();
        change
    }

    /// Adds a node; a node with the same id is replaced in place.
    pub fn add(&self, spec: NodeSpec) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.iter_mut().find(|n| n.id == spec.id) {
            Some(existing) => {
                existing.update_from_spec(&spec);
                false
            }
            None => {
                nodes.push(ServiceNode::from_spec(spec));
                true
            }
        }
    }

    pub fn remove(&self, id: &str) -> Option<ServiceNode> {
        let mut nodes = self.nodes.write();
        let idx = nodes.iter().position(|n| n.id == id)?;
        Some(nodes.remove(idx))
    }

    pub fn list(&self) -> Vec<ServiceNode> {
        self.nodes.read().clone()
    }

    pub fn get(&self, id: &str) -> Result<ServiceNode> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.id == id)
            .cloned()
            .ok_or_else(|| RouterError::NotFound(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.nodes.read().iter().map(|n| n.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Records a health check result. Returns the previous health.
    pub fn set_health(&self, id: &str, health: NodeHealth) -> Result<NodeHealth> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| RouterError::NotFound(id.to_string()))?;
        let previous = node.health;
        node.health = health;
        node.last_health_check = Some(SystemTime::now());
        Ok(previous)
    }

    /// Stamps `last_health_check` without changing health. Returns the
    /// current health.
    pub fn touch_health_check(&self, id: &str) -> Result<NodeHealth> {
        let mut nodes = self.nodes.write();
        let node = nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| RouterError::NotFound(id.to_string()))?;
        node.last_health_check = Some(SystemTime::now());
        Ok(node.health)
    }

    pub fn acquire_connection(&self, id: &str) {
        if let Some(node) = self.nodes.write().iter_mut().find(|n| n.id == id) {
            node.connections += 1;
        }
    }

    /// A node removed while a request was in flight is silently skipped.
    pub fn release_connection(&self, id: &str) {
        if let Some(node) = self.nodes.write().iter_mut().find(|n| n.id == id) {
            node.connections = node.connections.saturating_sub(1);
        }
    }

    /// Nodes that are not known to be unhealthy.
    pub fn routable_ids(&self) -> Vec<String> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.health.is_routable())
            .map(|n| n.id.clone())
            .collect()
    }
}
