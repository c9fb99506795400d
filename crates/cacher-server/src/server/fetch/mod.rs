//! Obtaining resource content.
//!
//! - [`cache_aside`] - [`CacheAsideFetcher`](cache_aside::CacheAsideFetcher)
//!   and TTL jitter.
//! - [`store`] - the [`CacheStore`](store::CacheStore) boundary and the
//!   in-process store.
//! - `redis` - a Redis-backed store, behind the `redis` feature.
//! - [`origin`] - the [`Origin`](origin::Origin) boundary and its HTTP
//!   implementation.

pub mod cache_aside;
pub mod origin;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
#[cfg(test)]
pub mod testing;
