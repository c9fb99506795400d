//! Hand-written collaborators for exercising the fetch and streaming paths.

use super::{origin::Origin, store::CacheStore};
use async_trait::async_trait;
use bytes::Bytes;
use cacher_core::{Error, Result, types::ResourceId};
use core::time::Duration;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Origin that answers `content-of:<id>` (or fails) after an optional delay,
/// counting calls and tracking how many fetches are in flight.
#[derive(Default)]
pub struct CountingOrigin {
    pub calls: AtomicUsize,
    pub in_flight: Arc<AtomicUsize>,
    latency: Duration,
    fail: bool,
    panic: bool,
}

impl CountingOrigin {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Panics inside `fetch`, tearing down the calling unit.
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn content_for(resource: &str) -> Bytes {
        Bytes::from(format!("content-of:{resource}"))
    }
}

/// Decrements the in-flight counter even when the fetch future is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Origin for CountingOrigin {
    async fn fetch(&self, resource: &ResourceId) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(Arc::clone(&self.in_flight));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.panic {
            panic!("origin client crashed while fetching {resource}");
        }
        if self.fail {
            return Err(Error::Origin {
                resource: resource.to_string(),
                reason: "503 Service Unavailable".to_string(),
            });
        }
        Ok(Self::content_for(resource.as_str()))
    }
}

/// Store whose reads and/or writes always fail, wrapping a working store for
/// the other operation.
pub struct FailingStore<S> {
    pub inner: S,
    pub fail_get: bool,
    pub fail_set: bool,
}

#[async_trait]
impl<S: CacheStore> CacheStore for FailingStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if self.fail_get {
            return Err(Error::Store {
                context: "connection refused".to_string(),
            });
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, content: Bytes, ttl: Duration) -> Result<()> {
        if self.fail_set {
            return Err(Error::Store {
                context: "read-only replica".to_string(),
            });
        }
        self.inner.set(key, content, ttl).await
    }
}

#[derive(Default)]
struct KeyEpoch {
    writers: usize,
    epoch: u64,
    overlaps: u64,
}

/// Store that never hits and records, per key, a monotonically increasing
/// write epoch plus how often two writes for the same key overlapped.
#[derive(Default)]
pub struct EpochStore {
    keys: Mutex<HashMap<String, KeyEpoch>>,
    write_latency: Duration,
}

impl EpochStore {
    pub fn with_write_latency(write_latency: Duration) -> Self {
        Self {
            write_latency,
            ..Self::default()
        }
    }

    pub fn epoch(&self, key: &str) -> u64 {
        self.keys.lock().get(key).map_or(0, |k| k.epoch)
    }

    pub fn overlaps(&self) -> u64 {
        self.keys.lock().values().map(|k| k.overlaps).sum()
    }
}

#[async_trait]
impl CacheStore for EpochStore {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
        Ok(None)
    }

    async fn set(&self, key: &str, _content: Bytes, _ttl: Duration) -> Result<()> {
        let observed = {
            let mut keys = self.keys.lock();
            let entry = keys.entry(key.to_owned()).or_default();
            if entry.writers > 0 {
                entry.overlaps += 1;
            }
            entry.writers += 1;
            entry.epoch
        };

        tokio::time::sleep(self.write_latency).await;

        let mut keys = self.keys.lock();
        let entry = keys.entry(key.to_owned()).or_default();
        // Another writer bumping the epoch mid-write means exclusion broke.
        if entry.epoch != observed {
            entry.overlaps += 1;
        }
        entry.epoch += 1;
        entry.writers -= 1;
        Ok(())
    }
}
