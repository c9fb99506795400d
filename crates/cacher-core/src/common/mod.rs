pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/cacher.proto`.
///
/// ## Service
///
/// - `GetRandomDataStream` - streams one fan-out round of randomly selected
///   resources.
///
/// ## Messages
///
/// - [`Nothing`](proto::Nothing) - the empty batch request.
/// - [`CacheData`](proto::CacheData) - one delivered resource body tagged with
///   its resource identifier.
pub mod proto {
    tonic::include_proto!("cacher");

    /// Encoded file descriptor set, registered with gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("cacher_descriptor");
}
