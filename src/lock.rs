//! Distributed lock: named mutexes with TTL, a fenced
//! acquire/release, and a `with_lock` scoped helper. Required for any
//! critical section a single relational transaction can't express —
//! combat turn resolution, movement, progression awards, affinity awards,
//! and reward distribution all go through this.

use crate::cache::KvCache;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not acquire lock for {resource} within {waited_ms}ms")]
    AcquireFailed { resource: String, waited_ms: u64 },
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
}

pub struct Lease {
    resource: String,
    token: String,
}

pub struct DistributedLock {
    cache: Arc<dyn KvCache>,
}

impl DistributedLock {
    pub fn new(cache: Arc<dyn KvCache>) -> Self {
        Self { cache }
    }

    fn key(resource: &str) -> String {
        format!("lock:{resource}")
    }

    /// Bounded exponential backoff with jitter, capped by `max_wait`.
    pub async fn acquire(&self, resource: &str, ttl: Duration, max_wait: Duration) -> Result<Lease, LockError> {
        let token = uuid::Uuid::new_v4().to_string();
        let key = Self::key(resource);
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut backoff_ms = 10u64;
        loop {
            if self.cache.set_nx_px(&key, &token, ttl.as_millis() as u64).await? {
                return Ok(Lease { resource: resource.to_string(), token });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LockError::AcquireFailed {
                    resource: resource.to_string(),
                    waited_ms: max_wait.as_millis() as u64,
                });
            }
            let jitter = rand::random::<u64>() % (backoff_ms / 2 + 1);
            tokio::time::sleep(Duration::from_millis(backoff_ms + jitter)).await;
            backoff_ms = (backoff_ms * 2).min(200);
        }
    }

    /// No-op if the stored token no longer matches (the lease already expired
    /// and someone else holds it).
    pub async fn release(&self, lease: &Lease) -> Result<(), LockError> {
        self.cache.compare_delete(&Self::key(&lease.resource), &lease.token).await?;
        Ok(())
    }

    pub async fn extend(&self, lease: &Lease, ttl: Duration) -> Result<bool, LockError> {
        Ok(self.cache.compare_extend(&Self::key(&lease.resource), &lease.token, ttl.as_millis() as u64).await?)
    }

    /// Acquire `resource`, run `f`, then release regardless of outcome.
    pub async fn with_lock<T, E, F, Fut>(&self, resource: &str, ttl: Duration, max_wait: Duration, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lease = self.acquire(resource, ttl, max_wait).await?;
        let result = f().await;
        let _ = self.release(&lease).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FakeCache;

    #[tokio::test]
    async fn second_acquire_fails_while_first_holds() {
        let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
        let lock = DistributedLock::new(cache);
        let lease = lock.acquire("combat:1:turn", Duration::from_secs(5), Duration::from_millis(50)).await.unwrap();
        let second = lock.acquire("combat:1:turn", Duration::from_secs(5), Duration::from_millis(50)).await;
        assert!(second.is_err());
        lock.release(&lease).await.unwrap();
        let third = lock.acquire("combat:1:turn", Duration::from_secs(5), Duration::from_millis(50)).await;
        assert!(third.is_ok());
    }
}
