//! Redis-backed [`CacheStore`], enabled by the `redis` feature.

use super::store::CacheStore;
use async_trait::async_trait;
use bytes::Bytes;
use cacher_core::{Error, Result};
use core::time::Duration;
use redis::{AsyncCommands, aio::ConnectionManager};

/// [`CacheStore`] on a shared, auto-reconnecting Redis connection.
///
/// `GET` and `SET ... EX` are each a single command, so both operations are
/// atomic on the server. Expiry is left entirely to Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

fn store_error(op: &str, err: &redis::RedisError) -> Error {
    Error::Store {
        context: format!("redis {op} failed: {err}"),
    }
}

impl RedisStore {
    /// Connects to `url` and verifies the server answers a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the URL is invalid or the server is
    /// unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| store_error("open", &e))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| store_error("connect", &e))?;

        let _: () = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("ping", &e))?;

        tracing::info!("Connected to redis cache store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(|e| store_error("GET", &e))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, content: Bytes, ttl: Duration) -> Result<()> {
        // Redis rejects `EX 0`; a zero TTL means "do not retain" anyway.
        let secs = ttl.as_secs();
        if secs == 0 {
            tracing::debug!(key, "Skipping cache write with zero TTL");
            return Ok(());
        }

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, content.as_ref(), secs)
            .await
            .map_err(|e| store_error("SET", &e))
    }
}
