use crate::circuit_breaker::{BreakerStatus, CircuitBreakerBank, CircuitState};
use crate::discovery::{DiscoveryProvider, StaticDiscovery};
use crate::events::{EventBus, RouterEvent};
use crate::executor::{HealthProbe, NodeExecutor};
use crate::health_monitor::HealthMonitor;
use crate::load_balancer::{LoadBalancer, RouteOptions};
use crate::registry::{NodeRegistry, TopologyChange};
use crate::rules::RoutingRuleEngine;
use noderoute_common::{
    ClusterConfig, ConfigError, NodeSpec, Result, RouterError, ServiceNode,
};
use noderoute_metrics::{ClusterMetrics, MetricsAggregator, Topology};
use noderoute_state::{DistributedStateStore, StateBackend};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const STATE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Builder for [`Router`].
///
/// Only the cluster configuration and a [`NodeExecutor`] are required.
/// Without a discovery provider the configured static node list is used.
/// With one, routing rule targets are checked against the discovered nodes.
/// Without a health probe no background health checking runs and nodes stay
/// in `Checking` (which is routable).
pub struct RouterBuilder {
    config: ClusterConfig,
    executor: Arc<dyn NodeExecutor>,
    discovery: Option<Arc<dyn DiscoveryProvider>>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    state_backend: Option<Arc<dyn StateBackend>>,
    rng_seed: Option<u64>,
    event_capacity: Option<usize>,
}

impl RouterBuilder {
    pub fn discovery(mut self, discovery: Arc<dyn DiscoveryProvider>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    pub fn state_backend(mut self, backend: Arc<dyn StateBackend>) -> Self {
        self.state_backend = Some(backend);
        self
    }

    /// Fixes the RNG used by weighted selection.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Validates the configuration, discovers nodes and starts background
    /// tasks. Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<Router> {
        let config = self.config;
        config.validate_policies()?;

        let rules = RoutingRuleEngine::new(&config.routing_rules)?;
        let events = self
            .event_capacity
            .map_or_else(EventBus::new, EventBus::with_capacity);

        let registry = Arc::new(NodeRegistry::new());
        match self.discovery {
            Some(discovery) => {
                registry.initialize(discovery.as_ref()).await?;
                // Rules may only name nodes the provider actually reported.
                let ids = registry.ids();
                config.validate_rule_targets(ids.iter().map(String::as_str))?;
            }
            None => {
                config.validate()?;
                registry
                    .initialize(&StaticDiscovery::from_config(&config.discovery))
                    .await?;
            }
        }

        let breakers = Arc::new(CircuitBreakerBank::new(
            config.circuit_breaker.clone(),
            events.clone(),
        ));
        let order = registry.ids();
        for id in &order {
            breakers.insert(id);
        }

        let balancer = match self.rng_seed {
            Some(seed) => LoadBalancer::with_seed(order, seed),
            None => LoadBalancer::new(order),
        };

        let state = match self.state_backend {
            Some(backend) => DistributedStateStore::with_backend(backend, config.state.session_ttl()),
            None => DistributedStateStore::from_config(&config.state),
        };

        let mut tasks = vec![state.spawn_sweeper(STATE_SWEEP_INTERVAL)];

        let monitor = match self.health_probe {
            Some(probe) if config.health_check.enabled => {
                let monitor = Arc::new(HealthMonitor::new(
                    Arc::clone(&registry),
                    Arc::clone(&breakers),
                    probe,
                    config.health_check.clone(),
                    events.clone(),
                ));
                tasks.push(Arc::clone(&monitor).spawn());
                Some(monitor)
            }
            _ => None,
        };

        info!(
            cluster = %config.name,
            nodes = registry.len(),
            strategy = %config.load_balancing,
            rules = rules.len(),
            health_checks = monitor.is_some(),
            "Router initialized"
        );

        Ok(Router {
            config,
            registry,
            breakers,
            balancer: Mutex::new(balancer),
            rules,
            executor: self.executor,
            metrics: MetricsAggregator::new(),
            state,
            events,
            monitor,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Rule-based, circuit-broken request router.
///
/// A call to [`route`](Router::route) goes through a fixed pipeline:
///
/// 1. **Rules**: the first routing rule matching the operation narrows the
///    candidate nodes
/// 2. **Availability**: unhealthy nodes and nodes with an unavailable circuit
///    breaker are dropped
/// 3. **Selection**: the configured strategy picks one node
/// 4. **Execution**: the [`NodeExecutor`] performs the call
/// 5. **Accounting**: breaker, metrics and connection count are updated and a
///    [`RouterEvent::RequestCompleted`] is published
///
/// Steps 1 to 3 and the start of accounting run under one selection lock, so
/// concurrent callers see a fair rotation. The executor runs outside any lock.
/// Failed calls are not retried on another node.
///
/// # Example
/// ```no_run
/// # use noderoute_common::{ClusterConfig, NodeSpec};
/// # use noderoute_router::{NodeExecutor, RouteOptions, Router};
/// # use std::sync::Arc;
/// # async fn demo(executor: Arc<dyn NodeExecutor>) -> noderoute_common::Result<()> {
/// let config = ClusterConfig::new(
///     "orders",
///     vec![
///         NodeSpec::new("node-1", "http://10.0.0.1:9000"),
///         NodeSpec::new("node-2", "http://10.0.0.2:9000"),
///     ],
/// );
/// let router = Router::new(config, executor).await?;
/// let response = router
///     .route("orders.get", serde_json::json!({"id": 7}), RouteOptions::default())
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Router {
    config: ClusterConfig,
    registry: Arc<NodeRegistry>,
    breakers: Arc<CircuitBreakerBank>,
    /// The selection lock
    balancer: Mutex<LoadBalancer>,
    rules: RoutingRuleEngine,
    executor: Arc<dyn NodeExecutor>,
    metrics: MetricsAggregator,
    state: DistributedStateStore,
    events: EventBus,
    monitor: Option<Arc<HealthMonitor>>,
    /// Background tasks, aborted on shutdown or drop
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    pub fn builder(config: ClusterConfig, executor: Arc<dyn NodeExecutor>) -> RouterBuilder {
        RouterBuilder {
            config,
            executor,
            discovery: None,
            health_probe: None,
            state_backend: None,
            rng_seed: None,
            event_capacity: None,
        }
    }

    /// Router over the configured static nodes with default options.
    pub async fn new(config: ClusterConfig, executor: Arc<dyn NodeExecutor>) -> Result<Self> {
        Self::builder(config, executor).build().await
    }

    /// Routes one call to one node.
    ///
    /// Errors before execution (`ClusterUnavailable`, `NoAvailableNode`,
    /// `MissingSessionId`) leave every counter untouched. Executor errors and
    /// timeouts are recorded against the node and returned as-is. Dropping the
    /// returned future mid-call counts as a failure on that node.
    pub async fn route(
        &self,
        operation: &str,
        payload: Value,
        options: RouteOptions,
    ) -> Result<Value> {
        let mut call = self.dispatch(operation, &options)?;
        let node = call.node.clone();

        let execution = self.executor.execute(&node, operation, &payload);
        let result = match options.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(result) => result,
                Err(_) => Err(RouterError::Timeout(timeout.as_millis() as u64)),
            },
            None => execution.await,
        };

        if let Err(e) = &result {
            warn!(node_id = %node.id, operation, "Execution failed: {}", e);
        }
        call.finish(result.is_ok());
        result
    }

    /// Rule filtering, availability filtering, selection and the start of
    /// accounting, all under the selection lock.
    fn dispatch(&self, operation: &str, options: &RouteOptions) -> Result<InFlight<'_>> {
        let mut balancer = self.balancer.lock();

        let candidates = self.rules.resolve_candidates(operation, self.registry.list());
        let available: Vec<ServiceNode> = candidates
            .into_iter()
            .filter(|node| node.health.is_routable() && self.breakers.is_available(&node.id))
            .collect();

        if available.is_empty() {
            return Err(if self.any_routable() {
                RouterError::NoAvailableNode {
                    operation: operation.to_string(),
                }
            } else {
                RouterError::ClusterUnavailable
            });
        }

        let node = balancer
            .select(self.config.load_balancing, &available, options)
            .map_err(|e| match e {
                RouterError::NoAvailableNode { .. } => RouterError::NoAvailableNode {
                    operation: operation.to_string(),
                },
                other => other,
            })?;

        self.registry.acquire_connection(&node.id);
        self.breakers.begin_request(&node.id);
        self.metrics.record_request(&node.id);
        debug!(
            node_id = %node.id,
            operation,
            strategy = %self.config.load_balancing,
            candidates = available.len(),
            "Selected node"
        );

        Ok(InFlight {
            router: self,
            node,
            operation: operation.to_string(),
            started: Instant::now(),
            finished: false,
        })
    }

    /// Whether any node in the cluster could take traffic right now.
    fn any_routable(&self) -> bool {
        self.registry
            .list()
            .iter()
            .any(|node| node.health.is_routable() && self.breakers.is_available(&node.id))
    }

    /// Live membership counts for metrics.
    fn topology(&self) -> Topology {
        let nodes = self.registry.list();
        let healthy_nodes = nodes
            .iter()
            .filter(|node| {
                node.health.is_routable() && self.breakers.state(&node.id) != Some(CircuitState::Open)
            })
            .count();
        Topology {
            total_nodes: nodes.len(),
            healthy_nodes,
        }
    }

    pub fn metrics(&self) -> ClusterMetrics {
        self.metrics.snapshot(self.topology())
    }

    /// Takes a snapshot and publishes it as [`RouterEvent::MetricsSnapshot`].
    pub fn publish_metrics(&self) -> ClusterMetrics {
        let snapshot = self.metrics();
        self.events.publish(RouterEvent::MetricsSnapshot(snapshot.clone()));
        snapshot
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    pub fn nodes(&self) -> Vec<ServiceNode> {
        self.registry.list()
    }

    pub fn node(&self, id: &str) -> Result<ServiceNode> {
        self.registry.get(id)
    }

    pub fn breakers(&self) -> Vec<BreakerStatus> {
        self.breakers.get_all()
    }

    /// Force-closes a node's breaker.
    pub fn reset_breaker(&self, id: &str) -> Result<()> {
        if self.breakers.reset(id) {
            info!(node_id = id, "Circuit breaker reset");
            Ok(())
        } else {
            Err(RouterError::NotFound(id.to_string()))
        }
    }

    /// Whether `id` is currently eligible for selection, ignoring rules.
    pub fn is_available(&self, id: &str) -> bool {
        self.registry
            .get(id)
            .map(|node| node.health.is_routable() && self.breakers.is_available(id))
            .unwrap_or(false)
    }

    pub fn state_store(&self) -> &DistributedStateStore {
        &self.state
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Runs one health check round now, if a probe is configured.
    pub async fn check_health(&self) -> bool {
        match &self.monitor {
            Some(monitor) => {
                monitor.check_all().await;
                true
            }
            None => false,
        }
    }

    /// Adds a node at runtime. An existing id is updated in place.
    pub fn add_node(&self, spec: NodeSpec) -> Result<()> {
        if spec.id.trim().is_empty() || spec.url.trim().is_empty() {
            return Err(ConfigError::Invalid("node id and url must not be empty".to_string()).into());
        }
        if spec.weight == 0 {
            return Err(
                ConfigError::Invalid(format!("node '{}' must have weight >= 1", spec.id)).into(),
            );
        }

        let id = spec.id.clone();
        let added = {
            let mut balancer = self.balancer.lock();
            let added = self.registry.add(spec);
            self.breakers.insert(&id);
            balancer.set_order(self.registry.ids());
            added
        };

        if added {
            info!(node_id = %id, "Node added");
            self.publish_topology(TopologyChange {
                added: vec![id],
                removed: Vec::new(),
            });
        } else {
            info!(node_id = %id, "Node updated");
        }
        Ok(())
    }

    /// Removes a node. In-flight calls to it still complete.
    pub fn remove_node(&self, id: &str) -> Result<ServiceNode> {
        let removed = {
            let mut balancer = self.balancer.lock();
            let removed = self
                .registry
                .remove(id)
                .ok_or_else(|| RouterError::NotFound(id.to_string()))?;
            self.breakers.remove(id);
            balancer.set_order(self.registry.ids());
            removed
        };
        self.metrics.forget_node(id);

        info!(node_id = id, "Node removed");
        self.publish_topology(TopologyChange {
            added: Vec::new(),
            removed: vec![id.to_string()],
        });
        Ok(removed)
    }

    /// Re-runs discovery and reconciles the node set.
    pub async fn refresh_topology(
        &self,
        discovery: &dyn DiscoveryProvider,
    ) -> Result<TopologyChange> {
        let specs = discovery.discover().await?;

        let change = {
            let mut balancer = self.balancer.lock();
            let change = self.registry.apply(specs);
            for id in &change.added {
                self.breakers.insert(id);
            }
            for id in &change.removed {
                self.breakers.remove(id);
            }
            balancer.set_order(self.registry.ids());
            change
        };
        for id in &change.removed {
            self.metrics.forget_node(id);
        }

        if !change.is_empty() {
            info!(
                added = change.added.len(),
                removed = change.removed.len(),
                total = self.registry.len(),
                "Topology refreshed"
            );
            self.publish_topology(change.clone());
        }
        Ok(change)
    }

    fn publish_topology(&self, change: TopologyChange) {
        self.events.publish(RouterEvent::NodesChanged {
            added: change.added,
            removed: change.removed,
            total: self.registry.len(),
        });
    }

    /// Forgets a sticky-session binding.
    pub fn release_session(&self, session_id: &str) -> bool {
        self.balancer.lock().release_session(session_id)
    }

    pub fn bound_node(&self, session_id: &str) -> Option<String> {
        self.balancer.lock().bound_node(session_id).map(str::to_string)
    }

    /// Stops background tasks. Routing keeps working without health checks.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        if !tasks.is_empty() {
            info!(cluster = %self.config.name, "Router shutting down");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("cluster", &self.config.name)
            .field("strategy", &self.config.load_balancing)
            .field("nodes", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// One dispatched call. Settles the node's accounting exactly once, on
/// [`finish`](InFlight::finish) or, if the call was abandoned, on drop.
struct InFlight<'a> {
    router: &'a Router,
    node: ServiceNode,
    operation: String,
    started: Instant,
    finished: bool,
}

impl InFlight<'_> {
    fn finish(&mut self, success: bool) {
        self.finished = true;
        let router = self.router;
        let node_id = self.node.id.as_str();

        if success {
            router.breakers.record_success(node_id);
            router.metrics.record_success(node_id, self.started);
        } else {
            router.breakers.record_failure(node_id);
            router.metrics.record_failure(node_id, self.started);
        }
        router.registry.release_connection(node_id);

        router.events.publish(RouterEvent::RequestCompleted {
            node_id: self.node.id.clone(),
            operation: std::mem::take(&mut self.operation),
            success,
            latency_us: self.started.elapsed().as_micros() as u64,
        });
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(node_id = %self.node.id, operation = %self.operation, "Call abandoned before completion");
            self.finish(false);
        }
    }
}
