//! noderoute common types
//!
//! Shared vocabulary for the noderoute crates:
//!
//! - [`node`] - service nodes, their health and metadata
//! - [`config`] - validated cluster configuration, loadable from TOML
//! - [`error`] - router and configuration errors
//!
//! # Example
//!
//! ```
//! use noderoute_common::{ClusterConfig, LoadBalancingStrategy, NodeSpec, RoutingRule};
//!
//! let config = ClusterConfig::new(
//!     "payments",
//!     vec![
//!         NodeSpec::new("node-1", "http://10.0.0.1:9000"),
//!         NodeSpec::new("node-2", "http://10.0.0.2:9000").with_weight(3),
//!     ],
//! )
//! .with_strategy(LoadBalancingStrategy::Weighted)
//! .with_rule(RoutingRule::new("^admin\\.", ["node-1"]));
//!
//! assert!(config.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod node;

pub use config::{
    CircuitBreakerConfig, ClusterConfig, DiscoveryConfig, HealthCheckConfig, LoadBalancingStrategy,
    RoutingRule, StateConfig,
};
pub use error::{ConfigError, Result, RouterError};
pub use node::{NodeHealth, NodeMetadata, NodeSpec, ServiceNode};
