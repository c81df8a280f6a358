use noderoute_common::{LoadBalancingStrategy, Result, RouterError, ServiceNode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;

/// Per-call routing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteOptions {
    /// Affinity key for sticky routing
    pub session_id: Option<String>,
    /// Upper bound on the node execution; elapsed counts as a node failure
    pub timeout: Option<Duration>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Node selection over an already-filtered candidate list.
///
/// The balancer owns the only mutable selection state: the round-robin
/// cursor, sticky-session bindings and the RNG for weighted draws. The
/// router keeps it behind its selection lock, so a `&mut self` call is one
/// atomic selection.
#[derive(Debug)]
pub struct LoadBalancer {
    /// Configured node order; round-robin rotates over this, not the candidates
    order: Vec<String>,
    cursor: usize,
    sessions: HashMap<String, String>,
    rng: StdRng,
}

impl LoadBalancer {
    pub fn new(order: Vec<String>) -> Self {
        Self::with_rng(order, StdRng::from_entropy())
    }

    /// Deterministic weighted draws.
    pub fn with_seed(order: Vec<String>, seed: u64) -> Self {
        Self::with_rng(order, StdRng::seed_from_u64(seed))
    }

    fn with_rng(order: Vec<String>, rng: StdRng) -> Self {
        Self {
            order,
            cursor: 0,
            sessions: HashMap::new(),
            rng,
        }
    }

    /// Replaces the configured order after a topology change.
    ///
    /// The cursor stays on the node it pointed at when that node survives.
    /// Sticky bindings to removed nodes are dropped.
    pub fn set_order(&mut self, order: Vec<String>) {
        let current = self.order.get(self.cursor).cloned();
        self.cursor = current
            .and_then(|id| order.iter().position(|o| *o == id))
            .unwrap_or(0);
        self.sessions.retain(|_, node_id| order.contains(node_id));
        self.order = order;
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    /// Picks exactly one node from `nodes`.
    pub fn select(
        &mut self,
        strategy: LoadBalancingStrategy,
        nodes: &[ServiceNode],
        options: &RouteOptions,
    ) -> Result<ServiceNode> {
        if nodes.is_empty() {
            return Err(RouterError::NoAvailableNode {
                operation: String::new(),
            });
        }

        let node = match strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin(nodes),
            LoadBalancingStrategy::LeastConnections => self.least_connections(nodes),
            LoadBalancingStrategy::Weighted => self.weighted(nodes),
            LoadBalancingStrategy::Sticky => {
                let session_id = options
                    .session_id
                    .as_deref()
                    .ok_or(RouterError::MissingSessionId)?;
                self.sticky(session_id, nodes)
            }
        };
        Ok(node.clone())
    }

    /// Advances the cursor over the configured order, skipping nodes that are
    /// not candidates. Two healthy nodes alternate strictly.
    fn round_robin<'a>(&mut self, nodes: &'a [ServiceNode]) -> &'a ServiceNode {
        let n = self.order.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            if let Some(node) = nodes.iter().find(|node| node.id == self.order[idx]) {
                self.cursor = (idx + 1) % n;
                return node;
            }
        }

        // Candidates outside the configured order: rotate over them directly.
        let node = &nodes[self.cursor % nodes.len()];
        self.cursor = self.cursor.wrapping_add(1);
        node
    }

    fn least_connections<'a>(&self, nodes: &'a [ServiceNode]) -> &'a ServiceNode {
        let rank = |node: &ServiceNode| {
            self.order
                .iter()
                .position(|id| *id == node.id)
                .unwrap_or(usize::MAX)
        };
        nodes
            .iter()
            .min_by_key(|node| (node.connections, rank(node)))
            .unwrap_or(&nodes[0])
    }

    /// Uniform draw on the cumulative weight line.
    fn weighted<'a>(&mut self, nodes: &'a [ServiceNode]) -> &'a ServiceNode {
        let total: u64 = nodes.iter().map(|n| u64::from(n.weight.max(1))).sum();
        let mut point = self.rng.gen_range(0..total);
        for node in nodes {
            let weight = u64::from(node.weight.max(1));
            if point < weight {
                return node;
            }
            point -= weight;
        }
        &nodes[nodes.len() - 1]
    }

    /// Reuses the session's binding while its node is a candidate; otherwise
    /// binds by stable hash over the current candidates and remembers it.
    fn sticky<'a>(&mut self, session_id: &str, nodes: &'a [ServiceNode]) -> &'a ServiceNode {
        if let Some(bound) = self.sessions.get(session_id) {
            if let Some(node) = nodes.iter().find(|node| node.id == *bound) {
                return node;
            }
        }

        let node = &nodes[(stable_hash(session_id) % nodes.len() as u64) as usize];
        self.sessions
            .insert(session_id.to_string(), node.id.clone());
        node
    }

    /// Forgets a sticky binding.
    pub fn release_session(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn bound_node(&self, session_id: &str) -> Option<&str> {
        self.sessions.get(session_id).map(String::as_str)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// FNV-1a; identical across processes and builds.
fn stable_hash(key: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    key.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}
