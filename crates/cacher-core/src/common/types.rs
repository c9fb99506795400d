//! # Shared Resource Types
//!
//! Types shared by the server and its clients.
//!
//! - [`ResourceId`] - an opaque, cheaply clonable identifier for one origin
//!   resource (in practice a URL). The server draws these from a fixed pool
//!   loaded at startup and uses them as cache keys and lock keys.

use core::{borrow::Borrow, fmt};
use std::sync::Arc;

/// Opaque identifier of one origin resource.
///
/// Backed by an `Arc<str>` so every fan-out unit can hold its own handle
/// without copying the string. Implements `Borrow<str>`, which lets maps keyed
/// by `ResourceId` be queried with a plain `&str`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
