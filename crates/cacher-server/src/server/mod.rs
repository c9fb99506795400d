//! Building blocks of the `cacher-server` binary.
//!
//! ## Submodules
//!
//! - [`config`] - command line and environment configuration.
//! - [`pool`] - the fixed resource pool.
//! - [`random`] - injectable randomness for resource picks and TTL jitter.
//! - [`locks`] - per-resource mutual exclusion.
//! - [`fetch`] - cache-aside fetching, cache stores and the origin client.
//! - [`streaming`] - the fan-out/fan-in round behind each stream.
//! - [`service`] - the gRPC service and shutdown.
//! - [`telemetry`] - logging, tracing and metrics setup.

pub mod config;
pub mod fetch;
pub mod locks;
pub mod pool;
pub mod random;
pub mod service;
pub mod streaming;
pub mod telemetry;
