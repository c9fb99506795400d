//! Origin transport boundary and its HTTP implementation.

use async_trait::async_trait;
use bytes::Bytes;
use cacher_core::{Error, Result, types::ResourceId};
use core::time::Duration;

/// Retrieves a resource from where it actually lives.
///
/// Implementations must not retry on their own; the caller decides what a
/// failure means for the round.
#[async_trait]
pub trait Origin: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Origin`] on transport errors, non-success responses,
    /// and unreadable bodies.
    async fn fetch(&self, resource: &ResourceId) -> Result<Bytes>;
}

/// Connection and timeout settings for [`HttpOrigin`].
#[derive(Debug, Clone)]
pub struct OriginSettings {
    /// Upper bound for one request, from connect to the end of the body.
    pub request_timeout: Duration,
    /// Idle connections kept per host for reuse.
    pub max_idle_per_host: usize,
    /// How long an idle connection is kept before it is closed.
    pub idle_timeout: Duration,
}

/// [`Origin`] that issues `GET <resource>` over HTTP(S).
///
/// Holds a single `reqwest::Client`, so all rounds share its connection pool.
#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(settings: &OriginSettings) -> core::result::Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .pool_idle_timeout(settings.idle_timeout)
            .build()?;
        Ok(Self { client })
    }
}

fn origin_error(resource: &ResourceId, err: &reqwest::Error) -> Error {
    Error::Origin {
        resource: resource.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, resource: &ResourceId) -> Result<Bytes> {
        let response = self
            .client
            .get(resource.as_str())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| origin_error(resource, &e))?;

        response.bytes().await.map_err(|e| origin_error(resource, &e))
    }
}
