//! The fixed pool of resources a round draws from.
//!
//! The pool is loaded once from configuration and never changes while the
//! process runs. Every other per-resource structure (the lock registry in
//! particular) is derived from it at startup.

use crate::server::random::RandSource;
use cacher_core::types::ResourceId;

/// Immutable, non-empty list of resource identifiers.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    resources: Box<[ResourceId]>,
}

impl ResourcePool {
    /// Builds a pool from configured identifiers, dropping duplicates while
    /// keeping first-seen order.
    ///
    /// Returns `None` if no identifiers remain.
    pub fn new<I, S>(ids: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<ResourceId>,
    {
        let mut resources: Vec<ResourceId> = Vec::new();
        for id in ids {
            let id = id.into();
            if !resources.contains(&id) {
                resources.push(id);
            }
        }

        if resources.is_empty() {
            return None;
        }

        Some(Self {
            resources: resources.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.iter()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.iter().any(|r| r.as_str() == id)
    }

    /// Draws one resource uniformly at random.
    pub fn pick(&self, rand: &dyn RandSource) -> ResourceId {
        let last = (self.resources.len() - 1) as u64;
        let idx = rand.rand_inclusive(0, last) as usize;
        self.resources[idx].clone()
    }

    /// Draws `count` resources with replacement.
    ///
    /// Repeats are expected; the lock registry is what keeps them from
    /// fetching the same origin concurrently.
    pub fn pick_many(&self, count: usize, rand: &dyn RandSource) -> Vec<ResourceId> {
        (0..count).map(|_| self.pick(rand)).collect()
    }
}
