use crate::circuit_breaker::CircuitBreakerBank;
use crate::events::{EventBus, RouterEvent};
use crate::executor::HealthProbe;
use crate::registry::NodeRegistry;
use noderoute_common::{HealthCheckConfig, NodeHealth, Result, RouterError, ServiceNode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
struct Streak {
    successes: u32,
    failures: u32,
}

/// Periodic health prober.
///
/// Probes run concurrently and each is bounded by the configured timeout. A
/// node flips to `Unhealthy` after `unhealthy_threshold` consecutive failed
/// probes and back to `Healthy` after `healthy_threshold` consecutive
/// successes. Rounds never overlap: a manual `check_all` waits for the
/// spawned tick to finish, so each round advances a streak at most once.
/// Only the round lock is held across a health check.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    breakers: Arc<CircuitBreakerBank>,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
    events: EventBus,
    streaks: Mutex<HashMap<String, Streak>>,
    round: tokio::sync::Mutex<()>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        breakers: Arc<CircuitBreakerBank>,
        probe: Arc<dyn HealthProbe>,
        config: HealthCheckConfig,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            breakers,
            probe,
            config,
            events,
            streaks: Mutex::new(HashMap::new()),
            round: tokio::sync::Mutex::new(()),
        }
    }

    /// Starts the health check task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            loop {
                interval.tick().await;
                self.check_all().await;
            }
        })
    }

    /// One round: moves expired breakers to half-open, then probes every node.
    pub async fn check_all(&self) {
        let _round = self.round.lock().await;

        let half_opened = self.breakers.poll_timeouts();
        if half_opened > 0 {
            debug!(half_opened, "Circuit breaker timeout check moved nodes to half-open");
        }

        let nodes = self.registry.list();
        let timeout = self.config.timeout();
        let checks = nodes.into_iter().map(|node| {
            let probe = Arc::clone(&self.probe);
            async move {
                let result = match tokio::time::timeout(timeout, probe.probe(&node)).await {
                    Ok(result) => result,
                    Err(_) => Err(RouterError::Timeout(timeout.as_millis() as u64)),
                };
                (node, result)
            }
        });

        let results = futures::future::join_all(checks).await;

        let live: Vec<String> = results.iter().map(|(node, _)| node.id.clone()).collect();
        self.streaks.lock().retain(|id, _| live.contains(id));

        for (node, result) in results {
            self.apply_probe_result(&node, result);
        }
    }

    fn apply_probe_result(&self, node: &ServiceNode, result: Result<()>) {
        let target = {
            let mut streaks = self.streaks.lock();
            let streak = streaks.entry(node.id.clone()).or_default();
            match &result {
                Ok(()) => {
                    streak.successes = streak.successes.saturating_add(1);
                    streak.failures = 0;
                    (streak.successes >= self.config.healthy_threshold).then_some(NodeHealth::Healthy)
                }
                Err(e) => {
                    streak.failures = streak.failures.saturating_add(1);
                    streak.successes = 0;
                    debug!(node_id = %node.id, failures = streak.failures, "Health probe failed: {}", e);
                    (streak.failures >= self.config.unhealthy_threshold)
                        .then_some(NodeHealth::Unhealthy)
                }
            }
        };

        // The node may have been removed while probes were running.
        let Some(health) = target else {
            let _ = self.registry.touch_health_check(&node.id);
            return;
        };
        let previous = match self.registry.set_health(&node.id, health) {
            Ok(previous) => previous,
            Err(_) => return,
        };

        if previous != health {
            match health {
                NodeHealth::Unhealthy => warn!(node_id = %node.id, "Node marked unhealthy"),
                other => info!(node_id = %node.id, from = ?previous, to = ?other, "Node health changed"),
            }
            self.events.publish(RouterEvent::HealthChanged {
                node_id: node.id.clone(),
                from: previous,
                to: health,
            });
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
