//! Fan-out/fan-in execution of a single streaming request.
//!
//! - [`coordinator`] - [`RequestCoordinator`](coordinator::RequestCoordinator)
//!   spawns the units of a round and settles them.
//! - [`processor`] - the body of one unit: lock, fetch, hand off.
//! - [`aggregator`] - forwards unit results to the caller and ends the stream.
//! - [`request`] - [`WorkItem`](request::WorkItem), the unit-to-aggregator
//!   message.

pub mod aggregator;
pub mod coordinator;
pub mod processor;
pub mod request;
