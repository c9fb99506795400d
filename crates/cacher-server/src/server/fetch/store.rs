//! Cache store boundary and the in-process store.
//!
//! The fetcher only needs two individually atomic operations from a store:
//! `get` and `set` with an expiry. Expiry is the store's job; nothing in the
//! service deletes entries explicitly.

use async_trait::async_trait;
use bytes::Bytes;
use cacher_core::Result;
use core::time::Duration;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;

/// A key-value store with per-entry expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live entry for `key`, or `None` if it is absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](cacher_core::Error::Store) if the store
    /// cannot be reached. Callers treat this like a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `content` under `key`, replacing any previous entry, and expires
    /// it after `ttl`. A zero `ttl` means the entry is not retained.
    async fn set(&self, key: &str, content: Bytes, ttl: Duration) -> Result<()>;
}

/// Retention used when a TTL overflows the clock.
const MAX_RETENTION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    content: Bytes,
    ttl: Duration,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process [`CacheStore`] backed by a mutex-guarded map.
///
/// Expired entries are dropped lazily on read and by
/// [`purge_expired`](Self::purge_expired), which
/// [`spawn_sweeper`](Self::spawn_sweeper) runs on an interval. Time is read
/// from `tokio::time`, so paused-clock tests can drive expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The TTL the live entry for `key` was stored with.
    #[cfg(test)]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.ttl)
    }

    /// Number of entries held, including ones that expired but were not yet
    /// swept.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Runs [`purge_expired`](Self::purge_expired) every `every` until
    /// `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            tracing::trace!(purged, "Swept expired cache entries");
                        }
                    }
                }
            }
            tracing::debug!("Cache sweeper stopped");
        })
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.content.clone())),
            Some(entry) => {
                tracing::trace!(key, ttl_secs = entry.ttl.as_secs(), "Dropping expired cache entry");
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, content: Bytes, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        // TTLs past what `Instant` can represent are clamped.
        let expires_at = now.checked_add(ttl).unwrap_or_else(|| now + MAX_RETENTION);
        let entry = Entry {
            content,
            ttl,
            expires_at,
        };
        self.entries.lock().insert(key.to_owned(), entry);
        Ok(())
    }
}
