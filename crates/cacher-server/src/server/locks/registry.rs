use crate::server::pool::ResourcePool;
use cacher_core::types::ResourceId;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Fixed set of per-resource exclusive locks.
///
/// One lock is created for every resource in the [`ResourcePool`] when the
/// registry is built. The map is never mutated afterwards, so lookups need no
/// synchronization of their own; only the individual locks are contended.
#[derive(Debug)]
pub struct KeyLockRegistry {
    locks: HashMap<ResourceId, Arc<Mutex<()>>>,
}

impl KeyLockRegistry {
    pub fn new(pool: &ResourcePool) -> Self {
        let locks = pool
            .iter()
            .map(|id| (id.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    /// Waits until no other unit holds the lock for `id`, then takes it.
    ///
    /// The returned [`ResourceGuard`] holds the lock until it is dropped or
    /// explicitly [released](ResourceGuard::release). Dropping also happens
    /// when the owning future is cancelled or its task unwinds, so the lock
    /// cannot outlive its holder.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not part of the pool the registry was built from.
    /// Every identifier handed out by the pool has a lock, so this only fires
    /// on a programming error.
    pub async fn acquire(&self, id: &ResourceId) -> ResourceGuard {
        let Some(lock) = self.locks.get(id.as_str()) else {
            panic!("no lock registered for resource `{id}`; it is not part of the configured pool");
        };

        let guard = Arc::clone(lock).lock_owned().await;
        tracing::trace!(resource = %id, "Resource lock acquired");

        ResourceGuard {
            resource: id.clone(),
            _guard: guard,
        }
    }

    /// Reports whether some unit currently holds the lock for `id`.
    ///
    /// Returns `None` for identifiers outside the pool.
    #[cfg(test)]
    pub fn is_held(&self, id: &str) -> Option<bool> {
        self.locks.get(id).map(|lock| lock.try_lock().is_err())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Proof that the current unit holds the lock for one resource.
///
/// The cache-aside fetcher takes a `&ResourceGuard` rather than a bare
/// identifier, so a cache write can only happen under the matching lock.
#[derive(Debug)]
pub struct ResourceGuard {
    resource: ResourceId,
    _guard: OwnedMutexGuard<()>,
}

impl ResourceGuard {
    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Releases the lock, letting one waiter (if any) proceed.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        tracing::trace!(resource = %self.resource, "Resource lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    fn registry(ids: &[&str]) -> Arc<KeyLockRegistry> {
        let pool = ResourcePool::new(ids.iter().copied()).unwrap();
        Arc::new(KeyLockRegistry::new(&pool))
    }

    #[tokio::test]
    async fn creates_one_lock_per_resource() {
        let locks = registry(&["a", "b", "a"]);
        assert_eq!(locks.len(), 2);
        assert_eq!(locks.is_held("a"), Some(false));
        assert_eq!(locks.is_held("zzz"), None);
    }

    #[tokio::test]
    async fn release_lets_a_waiter_proceed() {
        let locks = registry(&["a"]);
        let id = ResourceId::from("a");

        let guard = locks.acquire(&id).await;
        assert_eq!(guard.resource(), &id);
        assert_eq!(locks.is_held("a"), Some(true));

        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move { locks.acquire(&id).await.release() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        guard.release();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should proceed after release")
            .unwrap();
        assert_eq!(locks.is_held("a"), Some(false));
    }

    #[tokio::test]
    async fn distinct_resources_do_not_contend() {
        let locks = registry(&["a", "b"]);
        let _a = locks.acquire(&ResourceId::from("a")).await;
        let b = timeout(Duration::from_millis(100), locks.acquire(&ResourceId::from("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn serializes_holders_of_the_same_resource() {
        const TASKS: usize = 64;

        let locks = registry(&["hot"]);
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let holders = Arc::clone(&holders);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.acquire(&ResourceId::from("hot")).await;
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.is_held("hot"), Some(false));
    }

    #[tokio::test]
    async fn lock_is_released_when_holder_panics() {
        let locks = registry(&["a"]);
        let handle = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(&ResourceId::from("a")).await;
                panic!("unit torn down while holding the lock");
            })
        };
        assert!(handle.await.unwrap_err().is_panic());
        assert_eq!(locks.is_held("a"), Some(false));
    }

    #[tokio::test]
    #[should_panic(expected = "not part of the configured pool")]
    async fn acquiring_unknown_resource_panics() {
        let locks = registry(&["a"]);
        let _guard = locks.acquire(&ResourceId::from("elsewhere")).await;
    }
}
