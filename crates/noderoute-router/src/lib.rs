//! noderoute request router
//!
//! Routes named operations across a cluster of service nodes:
//!
//! - [`RoutingRuleEngine`] narrows candidates by operation-name pattern
//! - [`CircuitBreakerBank`] keeps failing nodes out of rotation
//! - [`LoadBalancer`] picks one node (round-robin, least-connections,
//!   weighted or sticky)
//! - [`HealthMonitor`] probes nodes in the background
//! - [`Router`] ties them together and records metrics
//!
//! Transport is pluggable: the router calls a [`NodeExecutor`] and never
//! talks to the network itself.

pub mod circuit_breaker;
pub mod discovery;
pub mod events;
pub mod executor;
pub mod health_monitor;
pub mod load_balancer;
pub mod registry;
pub mod router;
pub mod rules;

pub use circuit_breaker::{BreakerStatus, CircuitBreakerBank, CircuitState};
pub use discovery::{DiscoveryProvider, StaticDiscovery};
pub use events::{EventBus, RouterEvent};
pub use executor::{AlwaysHealthy, HealthProbe, NodeExecutor};
pub use health_monitor::HealthMonitor;
pub use load_balancer::{LoadBalancer, RouteOptions};
pub use registry::{NodeRegistry, TopologyChange};
pub use router::{Router, RouterBuilder};
pub use rules::RoutingRuleEngine;

pub use noderoute_common::{ClusterConfig, LoadBalancingStrategy, Result, RouterError};
pub use noderoute_metrics::ClusterMetrics;
pub use noderoute_state::DistributedStateStore;
