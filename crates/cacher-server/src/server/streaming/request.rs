use bytes::Bytes;
use cacher_core::{Result, types::ResourceId};

/// The outcome of one unit of a round, handed from the unit to the
/// aggregator.
#[derive(Debug)]
pub struct WorkItem {
    pub unit_id: usize,
    pub resource: ResourceId,
    pub outcome: Result<Bytes>,
}
