use async_trait::async_trait;
use noderoute_common::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Storage behind a [`DistributedStateStore`](crate::DistributedStateStore).
///
/// Implementations must make each call atomic with respect to every other
/// call: two concurrent `acquire_lock` calls for the same resource may never
/// both return `true`. Network backends report transport problems as
/// `RouterError::State`; contention is never an error.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn set_session(&self, id: &str, data: Value, ttl: Option<Duration>) -> Result<()>;
    async fn get_session(&self, id: &str) -> Result<Option<Value>>;
    async fn delete_session(&self, id: &str) -> Result<bool>;

    async fn acquire_lock(&self, resource: &str, owner: &str, ttl: Duration) -> Result<bool>;
    async fn release_lock(&self, resource: &str, owner: &str) -> Result<bool>;
    async fn lock_owner(&self, resource: &str) -> Result<Option<String>>;

    async fn set_shared(&self, key: &str, value: Value) -> Result<()>;
    async fn get_shared(&self, key: &str) -> Result<Option<Value>>;
    async fn delete_shared(&self, key: &str) -> Result<bool>;

    /// Drops expired sessions and locks, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct SessionEntry {
    data: Value,
    expires_at: Option<Instant>,
}

impl SessionEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// A held mutual-exclusion lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub resource: String,
    pub owner: String,
    pub expires_at: Instant,
}

impl LockRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct Tables {
    sessions: HashMap<String, SessionEntry>,
    locks: HashMap<String, LockRecord>,
    shared: HashMap<String, Value>,
}

/// Single-process backend. One mutex guards all three tables, so every
/// operation is linearizable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live locks.
    pub fn held_locks(&self) -> usize {
        let now = Instant::now();
        self.tables.lock().locks.values().filter(|l| l.is_live(now)).count()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn set_session(&self, id: &str, data: Value, ttl: Option<Duration>) -> Result<()> {
        let entry = SessionEntry {
            data,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.tables.lock().sessions.insert(id.to_string(), entry);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        match tables.sessions.get(id) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.data.clone())),
            Some(_) => {
                tables.sessions.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        Ok(self.tables.lock().sessions.remove(id).is_some())
    }

    async fn acquire_lock(&self, resource: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.locks.get(resource) {
            if existing.is_live(now) {
                return Ok(false);
            }
        }
        tables.locks.insert(
            resource.to_string(),
            LockRecord {
                resource: resource.to_string(),
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lock(&self, resource: &str, owner: &str) -> Result<bool> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        match tables.locks.get(resource) {
            Some(lock) if lock.owner == owner && lock.is_live(now) => {
                tables.locks.remove(resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_owner(&self, resource: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self
            .tables
            .lock()
            .locks
            .get(resource)
            .filter(|lock| lock.is_live(now))
            .map(|lock| lock.owner.clone()))
    }

    async fn set_shared(&self, key: &str, value: Value) -> Result<()> {
        self.tables.lock().shared.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_shared(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.tables.lock().shared.get(key).cloned())
    }

    async fn delete_shared(&self, key: &str) -> Result<bool> {
        Ok(self.tables.lock().shared.remove(key).is_some())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut tables = self.tables.lock();
        let before = tables.sessions.len() + tables.locks.len();
        tables.sessions.retain(|_, entry| entry.is_live(now));
        tables.locks.retain(|_, lock| lock.is_live(now));
        Ok(before - tables.sessions.len() - tables.locks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lock_excludes_second_owner() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(10);
        assert!(backend.acquire_lock("orders", "a", ttl).await.unwrap());
        assert!(!backend.acquire_lock("orders", "b", ttl).await.unwrap());
        // not reentrant either
        assert!(!backend.acquire_lock("orders", "a", ttl).await.unwrap());
        assert_eq!(backend.held_locks(), 1);
    }

    #[tokio::test]
    async fn test_release_requires_owner() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(10);
        backend.acquire_lock("orders", "a", ttl).await.unwrap();
        assert!(!backend.release_lock("orders", "b").await.unwrap());
        assert_eq!(backend.lock_owner("orders").await.unwrap().as_deref(), Some("a"));
        assert!(backend.release_lock("orders", "a").await.unwrap());
        assert!(!backend.release_lock("orders", "a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_can_be_taken() {
        let backend = MemoryBackend::new();
        assert!(backend.acquire_lock("orders", "a", Duration::from_millis(100)).await.unwrap());

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(backend.lock_owner("orders").await.unwrap(), None);
        assert!(!backend.release_lock("orders", "a").await.unwrap());
        assert!(backend.acquire_lock("orders", "b", Duration::from_millis(100)).await.unwrap());
        assert_eq!(backend.lock_owner("orders").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set_session("s1", json!({"user": 1}), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        backend.set_session("s2", json!({"user": 2}), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(backend.get_session("s1").await.unwrap(), None);
        assert_eq!(backend.get_session("s2").await.unwrap(), Some(json!({"user": 2})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let backend = MemoryBackend::new();
        backend.set_session("s1", json!(1), Some(Duration::from_secs(1))).await.unwrap();
        backend.set_session("s2", json!(2), None).await.unwrap();
        backend.acquire_lock("r1", "a", Duration::from_secs(1)).await.unwrap();
        backend.acquire_lock("r2", "a", Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(backend.purge_expired().await.unwrap(), 2);
        assert_eq!(backend.held_locks(), 1);
        assert_eq!(backend.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shared_data_last_write_wins() {
        let backend = MemoryBackend::new();
        backend.set_shared("k", json!("v1")).await.unwrap();
        backend.set_shared("k", json!("v2")).await.unwrap();
        assert_eq!(backend.get_shared("k").await.unwrap(), Some(json!("v2")));
        assert!(backend.delete_shared("k").await.unwrap());
        assert_eq!(backend.get_shared("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_grants_once() {
        let backend = Arc::new(MemoryBackend::new());
        let attempts: Vec<_> = (0..32)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .acquire_lock("leader", &format!("owner-{}", i), Duration::from_secs(30))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut granted = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }
}
