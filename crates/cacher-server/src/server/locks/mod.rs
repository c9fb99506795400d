//! Per-resource mutual exclusion.
//!
//! - [`registry`] - [`KeyLockRegistry`](registry::KeyLockRegistry), the fixed
//!   map from resource identifier to lock, and the scoped
//!   [`ResourceGuard`](registry::ResourceGuard) handed to lock holders.
//!
//! The registry serializes access to a resource; it does not share fetched
//! values between waiters. Each unit re-checks the cache once it holds the
//! lock.

pub mod registry;
