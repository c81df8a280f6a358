//! Cluster configuration.
//!
//! A [`ClusterConfig`] is built once, validated, and handed to the router.
//! It is never mutated afterwards; changing it means building a new router.

use crate::error::ConfigError;
use crate::node::NodeSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Node selection policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
    Sticky,
}

impl std::fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadBalancingStrategy::RoundRobin => "round-robin",
            LoadBalancingStrategy::LeastConnections => "least-connections",
            LoadBalancingStrategy::Weighted => "weighted",
            LoadBalancingStrategy::Sticky => "sticky",
        };
        f.write_str(name)
    }
}

/// Where the node list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum DiscoveryConfig {
    Static { nodes: Vec<NodeSpec> },
}

impl DiscoveryConfig {
    /// Nodes listed directly in the configuration.
    pub fn static_nodes(&self) -> &[NodeSpec] {
        match self {
            DiscoveryConfig::Static { nodes } => nodes,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit stays open before a trial is allowed
    pub reset_timeout_ms: u64,
    /// Trial calls admitted while half-open
    pub half_open_requests: u32,
    /// Growth of the reset timeout each time the circuit re-opens without closing.
    /// 1.0 keeps it fixed.
    pub backoff_multiplier: f64,
    /// Upper bound for the backed-off reset timeout
    pub max_reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_requests: 1,
            backoff_multiplier: 1.0,
            max_reset_timeout_ms: 300_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Reset timeout after the circuit has opened `consecutive_opens` times in a row.
    pub fn reset_timeout_for(&self, consecutive_opens: u32) -> Duration {
        let exponent = consecutive_opens.saturating_sub(1) as i32;
        let backoff_ms = self.reset_timeout_ms as f64 * self.backoff_multiplier.powi(exponent);
        let cap_ms = self.max_reset_timeout_ms.max(self.reset_timeout_ms);
        Duration::from_millis((backoff_ms as u64).min(cap_ms))
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            timeout_ms: 2_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Pattern-to-target override evaluated before load balancing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Regular expression matched against the operation name
    pub pattern: String,
    /// Node ids eligible when the pattern matches
    pub targets: Vec<String>,
}

impl RoutingRule {
    pub fn new<I, S>(pattern: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pattern: pattern.into(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Session lifetime; sessions never expire when unset
    pub session_ttl_ms: Option<u64>,
}

impl StateConfig {
    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl_ms.map(Duration::from_millis)
    }
}

/// Complete description of a routed cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
    #[serde(default)]
    pub state: StateConfig,
}

impl ClusterConfig {
    /// Static cluster with default policies.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeSpec>) -> Self {
        Self {
            name: name.into(),
            discovery: DiscoveryConfig::Static { nodes },
            load_balancing: LoadBalancingStrategy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check: HealthCheckConfig::default(),
            routing_rules: Vec::new(),
            state: StateConfig::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.load_balancing = strategy;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.routing_rules.push(rule);
        self
    }

    pub fn with_state(mut self, state: StateConfig) -> Self {
        self.state = state;
        self
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Rejects configurations the router cannot run with. Rule targets must
    /// name statically configured nodes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_policies()?;
        self.validate_rule_targets(self.discovery.static_nodes().iter().map(|n| n.id.as_str()))
    }

    /// Everything [`validate`](Self::validate) checks except rule targets,
    /// for clusters whose membership is only known after discovery.
    pub fn validate_policies(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("cluster name must not be empty"));
        }

        let mut ids = HashSet::new();
        for node in self.discovery.static_nodes() {
            if node.id.trim().is_empty() {
                return Err(invalid("node id must not be empty"));
            }
            if node.url.trim().is_empty() {
                return Err(invalid(format!("node '{}' has an empty url", node.id)));
            }
            if node.weight == 0 {
                return Err(invalid(format!("node '{}' must have weight >= 1", node.id)));
            }
            if !ids.insert(node.id.as_str()) {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold must be >= 1"));
        }
        if cb.half_open_requests == 0 {
            return Err(invalid("circuit_breaker.half_open_requests must be >= 1"));
        }
        if !(cb.backoff_multiplier >= 1.0) {
            return Err(invalid("circuit_breaker.backoff_multiplier must be >= 1.0"));
        }

        let hc = &self.health_check;
        if hc.interval_ms == 0 || hc.timeout_ms == 0 {
            return Err(invalid("health_check interval and timeout must be > 0"));
        }
        if hc.unhealthy_threshold == 0 || hc.healthy_threshold == 0 {
            return Err(invalid("health_check thresholds must be >= 1"));
        }

        for rule in &self.routing_rules {
            regex::Regex::new(&rule.pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: rule.pattern.clone(),
                source,
            })?;
            if rule.targets.is_empty() {
                return Err(invalid(format!("routing rule '{}' has no targets", rule.pattern)));
            }
        }

        Ok(())
    }

    /// Every rule target must be one of `known` node ids.
    pub fn validate_rule_targets<'a>(
        &self,
        known: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigError> {
        let known: HashSet<&str> = known.into_iter().collect();
        for rule in &self.routing_rules {
            if let Some(target) = rule.targets.iter().find(|t| !known.contains(t.as_str())) {
                return Err(invalid(format!(
                    "routing rule '{}' targets unknown node '{}'",
                    rule.pattern, target
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
