//! Error types for the cacher streaming service.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure inside a fan-out round. It implements
//! `From<Error>` for `tonic::Status` so failures can be surfaced to gRPC
//! clients with a fitting status code.
//!
//! ## Error Cases
//! - `ChannelError`: An internal hand-off failure between units, the
//!   aggregator and the response stream (usually a client disconnect).
//! - `Origin`: Retrieving a resource from its origin failed (network error,
//!   non-success status or an unreadable body).
//! - `Store`: The cache store could not be reached or rejected a command.
//! - `RequestCancelled`: The round was cancelled before it completed.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.

use tonic::Status;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the cacher service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The origin transport failed to produce the resource.
    #[error("Origin fetch for `{resource}` failed: {reason}")]
    Origin { resource: String, reason: String },

    /// The cache store failed a read or write.
    #[error("Store error: {context}")]
    Store { context: String },

    /// The round was cancelled mid-flight.
    #[error("Request cancelled")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => Status::internal(format!("Channel error: {context}")),
            Error::Origin { resource, reason } => {
                Status::unavailable(format!("Origin fetch for `{resource}` failed: {reason}"))
            }
            Error::Store { context } => Status::unavailable(format!("Store error: {context}")),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn maps_errors_to_status_codes() {
        let origin = Error::Origin {
            resource: "https://example.com".to_string(),
            reason: "502 Bad Gateway".to_string(),
        };
        assert_eq!(Status::from(origin).code(), Code::Unavailable);
        assert_eq!(
            Status::from(Error::RequestCancelled).code(),
            Code::Cancelled
        );
        assert_eq!(
            Status::from(Error::ServiceShutdown).code(),
            Code::Unavailable
        );

        let status = Status::from(Error::ChannelError {
            context: "channel closed".to_string(),
        });
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Channel error: channel closed");
    }
}
