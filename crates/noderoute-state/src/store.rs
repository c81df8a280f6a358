use crate::backend::{MemoryBackend, StateBackend};
use noderoute_common::{Result, StateConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Session, lock and shared-data facade used by routed services.
///
/// The store owns no data itself; it forwards to a [`StateBackend`]
/// and applies the configured session lifetime. The default backend is
/// [`MemoryBackend`].
///
/// Locks are try-locks: [`acquire_lock`](Self::acquire_lock) answers
/// immediately and contention is reported as `Ok(false)`.
#[derive(Clone)]
pub struct DistributedStateStore {
    backend: Arc<dyn StateBackend>,
    session_ttl: Option<Duration>,
}

impl DistributedStateStore {
    /// Memory-backed store with sessions that never expire.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), None)
    }

    pub fn from_config(config: &StateConfig) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), config.session_ttl())
    }

    pub fn with_backend(backend: Arc<dyn StateBackend>, session_ttl: Option<Duration>) -> Self {
        Self {
            backend,
            session_ttl,
        }
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        self.session_ttl
    }

    pub async fn set_session(&self, id: &str, data: Value) -> Result<()> {
        self.backend.set_session(id, data, self.session_ttl).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Value>> {
        self.backend.get_session(id).await
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        self.backend.delete_session(id).await
    }

    /// Takes `resource` for `owner` unless someone holds a live lock on it.
    pub async fn acquire_lock(&self, resource: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let acquired = self.backend.acquire_lock(resource, owner, ttl).await?;
        debug!(resource, owner, acquired, ttl_ms = ttl.as_millis() as u64, "lock acquire");
        Ok(acquired)
    }

    /// Releases `resource` if `owner` still holds it.
    pub async fn release_lock(&self, resource: &str, owner: &str) -> Result<bool> {
        let released = self.backend.release_lock(resource, owner).await?;
        debug!(resource, owner, released, "lock release");
        Ok(released)
    }

    pub async fn lock_owner(&self, resource: &str) -> Result<Option<String>> {
        self.backend.lock_owner(resource).await
    }

    pub async fn set_shared_data(&self, key: &str, value: Value) -> Result<()> {
        self.backend.set_shared(key, value).await
    }

    pub async fn get_shared_data(&self, key: &str) -> Result<Option<Value>> {
        self.backend.get_shared(key).await
    }

    pub async fn delete_shared_data(&self, key: &str) -> Result<bool> {
        self.backend.delete_shared(key).await
    }

    pub async fn purge_expired(&self) -> Result<usize> {
        self.backend.purge_expired().await
    }

    /// Periodically purges expired entries until the handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "purged expired state entries"),
                    Err(e) => warn!("state sweep failed: {}", e),
                }
            }
        })
    }
}

impl std::fmt::Debug for DistributedStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedStateStore")
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_lock_handoff() {
        let store = DistributedStateStore::in_memory();
        let ttl = Duration::from_secs(5);

        assert!(store.acquire_lock("invoice-7", "owner-a", ttl).await.unwrap());
        assert!(!store.acquire_lock("invoice-7", "owner-b", ttl).await.unwrap());
        assert!(store.release_lock("invoice-7", "owner-a").await.unwrap());
        assert!(store.acquire_lock("invoice-7", "owner-b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_locks_are_per_resource() {
        let store = DistributedStateStore::in_memory();
        let ttl = Duration::from_secs(5);
        assert!(store.acquire_lock("a", "owner", ttl).await.unwrap());
        assert!(store.acquire_lock("b", "owner", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_sessions() {
        let store = DistributedStateStore::in_memory();
        assert_eq!(store.get_session("missing").await.unwrap(), None);

        store.set_session("s", json!({"cart": [1]})).await.unwrap();
        store.set_session("s", json!({"cart": [1, 2]})).await.unwrap();
        assert_eq!(store.get_session("s").await.unwrap(), Some(json!({"cart": [1, 2]})));

        assert!(store.delete_session("s").await.unwrap());
        assert!(!store.delete_session("s").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_session_ttl() {
        let store = DistributedStateStore::from_config(&StateConfig {
            session_ttl_ms: Some(1_000),
        });
        assert_eq!(store.session_ttl(), Some(Duration::from_secs(1)));

        store.set_session("s", json!(true)).await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(store.get_session("s").await.unwrap(), Some(json!(true)));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(store.get_session("s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shared_data() {
        let store = DistributedStateStore::in_memory();
        store.set_shared_data("leader", json!("node-1")).await.unwrap();
        assert_eq!(store.get_shared_data("leader").await.unwrap(), Some(json!("node-1")));
        assert!(store.delete_shared_data("leader").await.unwrap());
        assert_eq!(store.get_shared_data("leader").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges() {
        let store = DistributedStateStore::in_memory();
        store.acquire_lock("r", "a", Duration::from_millis(10)).await.unwrap();

        let handle = store.spawn_sweeper(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.abort();

        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(store.lock_owner("r").await.unwrap(), None);
    }
}
