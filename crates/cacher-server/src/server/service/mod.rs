//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`CacheService`) and graceful
//!   shutdown.

pub mod handler;
