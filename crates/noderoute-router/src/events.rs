use crate::circuit_breaker::CircuitState;
use noderoute_common::NodeHealth;
use noderoute_metrics::ClusterMetrics;
use serde::Serialize;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Something observable happened inside the router.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterEvent {
    NodesChanged {
        added: Vec<String>,
        removed: Vec<String>,
        total: usize,
    },
    RequestCompleted {
        node_id: String,
        operation: String,
        success: bool,
        latency_us: u64,
    },
    MetricsSnapshot(ClusterMetrics),
    BreakerTransition {
        node_id: String,
        from: CircuitState,
        to: CircuitState,
    },
    HealthChanged {
        node_id: String,
        from: NodeHealth,
        to: NodeHealth,
    },
}

/// Fan-out of [`RouterEvent`]s to any number of subscribers.
///
/// Publishing never waits: with no subscribers the event is dropped, and a
/// subscriber that falls more than the channel capacity behind sees
/// `RecvError::Lagged` instead of slowing the router down.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RouterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: RouterEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
