use super::{origin::Origin, store::CacheStore};
use crate::server::{
    locks::registry::ResourceGuard,
    random::RandSource,
    telemetry::{increment_cache_hits, increment_cache_misses, increment_origin_failures},
};
use bytes::Bytes;
use cacher_core::Result;
use core::time::Duration;
use std::sync::Arc;

/// Inclusive bounds, in seconds, for the TTL of freshly cached content.
///
/// The bounds are kept exactly as configured; an inverted pair is tolerated
/// and normalized by [`sample_ttl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

/// Draws a TTL uniformly from `[min_secs, max_secs]`, swapping the bounds
/// first if they are inverted.
pub fn sample_ttl(range: TtlRange, rand: &dyn RandSource) -> Duration {
    let (low, high) = if range.min_secs > range.max_secs {
        (range.max_secs, range.min_secs)
    } else {
        (range.min_secs, range.max_secs)
    };
    Duration::from_secs(rand.rand_inclusive(low, high))
}

/// Cache-aside reads with randomized expiry.
///
/// The cache is consulted first. On a miss the origin is fetched and the
/// result written back with a jittered TTL, so entries populated together do
/// not all expire together. The fetcher is the only writer of cache state.
pub struct CacheAsideFetcher {
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn Origin>,
    ttl: TtlRange,
    rand: Arc<dyn RandSource>,
}

impl CacheAsideFetcher {
    pub fn new(
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn Origin>,
        ttl: TtlRange,
        rand: Arc<dyn RandSource>,
    ) -> Self {
        Self {
            store,
            origin,
            ttl,
            rand,
        }
    }

    /// Returns the content of the resource `guard` locks.
    ///
    /// Requiring the guard ties the whole read-fetch-write sequence to the
    /// per-resource lock: a second unit that drew the same resource only gets
    /// here after this one has populated the cache, and then takes the hit
    /// path.
    ///
    /// # Behavior
    ///
    /// - Cache hit: returned as is; the origin is not contacted.
    /// - Cache miss or unreachable store: fetched from origin.
    /// - Origin failure: propagated. Nothing is cached and no fallback
    ///   content is substituted.
    /// - Failed cache write: logged; the fetched content is still returned.
    ///
    /// # Errors
    ///
    /// Returns the origin's [`Error::Origin`](cacher_core::Error::Origin)
    /// when the content could not be obtained at all.
    pub async fn fetch(&self, guard: &ResourceGuard) -> Result<Bytes> {
        let resource = guard.resource();

        match self.store.get(resource.as_str()).await {
            Ok(Some(content)) => {
                increment_cache_hits();
                tracing::trace!(%resource, "Cache hit");
                return Ok(content);
            }
            Ok(None) => {
                tracing::trace!(%resource, "Cache miss");
            }
            Err(e) => {
                tracing::warn!(%resource, error = %e, "Cache read failed, falling back to origin");
            }
        }
        increment_cache_misses();

        let content = match self.origin.fetch(resource).await {
            Ok(content) => content,
            Err(e) => {
                increment_origin_failures();
                return Err(e);
            }
        };

        let ttl = sample_ttl(self.ttl, self.rand.as_ref());
        if let Err(e) = self
            .store
            .set(resource.as_str(), content.clone(), ttl)
            .await
        {
            tracing::warn!(%resource, error = %e, "Cache write failed, serving uncached content");
        } else {
            tracing::debug!(%resource, ttl_secs = ttl.as_secs(), bytes = content.len(), "Cached origin content");
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        fetch::{
            store::MemoryStore,
            testing::{CountingOrigin, EpochStore, FailingStore},
        },
        locks::registry::KeyLockRegistry,
        pool::ResourcePool,
        random::{
            ThreadRandom,
            testing::{Extreme, SeededRandom},
        },
    };
    use cacher_core::{Error, types::ResourceId};

    const KEY: &str = "https://origin.example/a";

    fn locks() -> KeyLockRegistry {
        KeyLockRegistry::new(&ResourcePool::new([KEY, "https://origin.example/b"]).unwrap())
    }

    fn fetcher(
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn Origin>,
        min_secs: u64,
        max_secs: u64,
    ) -> CacheAsideFetcher {
        CacheAsideFetcher::new(
            store,
            origin,
            TtlRange { min_secs, max_secs },
            Arc::new(ThreadRandom),
        )
    }

    #[test]
    fn sample_ttl_hits_both_inclusive_bounds() {
        let range = TtlRange {
            min_secs: 10,
            max_secs: 50,
        };
        assert_eq!(sample_ttl(range, &Extreme::Low), Duration::from_secs(10));
        assert_eq!(sample_ttl(range, &Extreme::High), Duration::from_secs(50));
    }

    #[test]
    fn sample_ttl_swaps_inverted_bounds() {
        let inverted = TtlRange {
            min_secs: 50,
            max_secs: 10,
        };
        assert_eq!(sample_ttl(inverted, &Extreme::Low), Duration::from_secs(10));
        assert_eq!(sample_ttl(inverted, &Extreme::High), Duration::from_secs(50));

        let rand = SeededRandom::new(0xCAC4E);
        for _ in 0..10_000 {
            let secs = sample_ttl(inverted, &rand).as_secs();
            assert!((10..=50).contains(&secs), "ttl {secs} out of range");
        }
    }

    #[test]
    fn sample_ttl_with_equal_bounds_is_constant() {
        let range = TtlRange {
            min_secs: 30,
            max_secs: 30,
        };
        assert_eq!(sample_ttl(range, &ThreadRandom), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn hit_never_touches_origin() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(KEY, Bytes::from_static(b"cached"), Duration::from_secs(60))
            .await
            .unwrap();
        let origin = Arc::new(CountingOrigin::ok());
        let fetcher = fetcher(store, origin.clone(), 10, 20);

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        let content = fetcher.fetch(&guard).await.unwrap();

        assert_eq!(content, Bytes::from_static(b"cached"));
        assert_eq!(origin.calls(), 0);
    }

    #[tokio::test]
    async fn miss_fetches_and_populates_with_ttl_in_range() {
        let store = Arc::new(MemoryStore::new());
        let origin = Arc::new(CountingOrigin::ok());
        let fetcher = fetcher(store.clone(), origin.clone(), 10, 20);

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        let content = fetcher.fetch(&guard).await.unwrap();

        assert_eq!(content, CountingOrigin::content_for(KEY));
        assert_eq!(origin.calls(), 1);
        assert_eq!(store.get(KEY).await.unwrap(), Some(content));
        let ttl = store.ttl_of(KEY).unwrap();
        assert!(
            (Duration::from_secs(10)..=Duration::from_secs(20)).contains(&ttl),
            "ttl {ttl:?} out of range"
        );

        // The second read under the lock is served from the cache.
        fetcher.fetch(&guard).await.unwrap();
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn inverted_bounds_are_swapped_before_caching() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = fetcher(store.clone(), Arc::new(CountingOrigin::ok()), 50, 10);

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        fetcher.fetch(&guard).await.unwrap();

        let ttl = store.ttl_of(KEY).unwrap();
        assert!((Duration::from_secs(10)..=Duration::from_secs(50)).contains(&ttl));
    }

    #[tokio::test]
    async fn maximal_ttl_bounds_still_cache_and_return_content() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = fetcher(
            store.clone(),
            Arc::new(CountingOrigin::ok()),
            u64::MAX,
            u64::MAX,
        );

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        let content = fetcher.fetch(&guard).await.unwrap();

        assert_eq!(content, CountingOrigin::content_for(KEY));
        assert_eq!(store.get(KEY).await.unwrap(), Some(content));
        assert_eq!(store.ttl_of(KEY), Some(Duration::from_secs(u64::MAX)));
    }

    #[tokio::test]
    async fn origin_failure_is_propagated_and_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let fetcher = fetcher(store.clone(), Arc::new(CountingOrigin::failing()), 10, 20);

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        let err = fetcher.fetch(&guard).await.unwrap_err();

        assert!(matches!(err, Error::Origin { ref resource, .. } if resource == KEY));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unreadable_store_falls_through_to_origin() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_get: true,
            fail_set: false,
        });
        let origin = Arc::new(CountingOrigin::ok());
        let fetcher = fetcher(store.clone(), origin.clone(), 10, 20);

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        let content = fetcher.fetch(&guard).await.unwrap();

        assert_eq!(content, CountingOrigin::content_for(KEY));
        assert_eq!(origin.calls(), 1);
        assert!(store.inner.ttl_of(KEY).is_some());
    }

    #[tokio::test]
    async fn failed_write_still_returns_content() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_get: false,
            fail_set: true,
        });
        let fetcher = fetcher(store.clone(), Arc::new(CountingOrigin::ok()), 10, 20);

        let locks = locks();
        let guard = locks.acquire(&ResourceId::from(KEY)).await;
        let content = fetcher.fetch(&guard).await.unwrap();

        assert_eq!(content, CountingOrigin::content_for(KEY));
        assert!(store.inner.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn writes_for_a_key_never_overlap_under_load() {
        const TASKS: usize = 256;
        let keys = [KEY, "https://origin.example/b"];

        let store = Arc::new(EpochStore::with_write_latency(Duration::from_millis(1)));
        let fetcher = Arc::new(fetcher(store.clone(), Arc::new(CountingOrigin::ok()), 1, 2));
        let locks = Arc::new(locks());

        let handles: Vec<_> = (0..TASKS)
            .map(|i| {
                let fetcher = Arc::clone(&fetcher);
                let locks = Arc::clone(&locks);
                let id = ResourceId::from(keys[i % keys.len()]);
                tokio::spawn(async move {
                    let guard = locks.acquire(&id).await;
                    fetcher.fetch(&guard).await.unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        // The store never hits, so every task wrote exactly once.
        assert_eq!(store.epoch(KEY) + store.epoch(keys[1]), TASKS as u64);
        assert_eq!(store.overlaps(), 0);
    }
}
