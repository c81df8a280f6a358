use async_trait::async_trait;
use noderoute_common::{Result, ServiceNode};
use serde_json::Value;

/// Performs the actual call against a selected node.
///
/// The router owns selection, accounting and breaker bookkeeping; an executor
/// only has to deliver `payload` to `node` and hand back the response. Any
/// error it returns is counted as a node failure and propagated unchanged.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &ServiceNode, operation: &str, payload: &Value) -> Result<Value>;
}

/// Liveness check used by the health monitor.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, node: &ServiceNode) -> Result<()>;
}

/// Probe that always succeeds; nodes turn healthy after the first checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn probe(&self, _node: &ServiceNode) -> Result<()> {
        Ok(())
    }
}
