//! Redis-backed job store.
//!
//! Every worker process opens its own [`RedisJobStore`]; the server is the
//! only shared state. A claim is a single multi-key `BRPOP`, so whichever
//! client the server answers first owns the task.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::JobStore;
use crate::error::StoreError;

/// [`JobStore`] over a Redis server.
#[derive(Clone)]
pub struct RedisJobStore {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
}

impl RedisJobStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!(redis_url = %redact_url(redis_url), "Connected to job store");
        Ok(Self { redis })
    }

    /// Wraps an existing connection manager.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Releases the connection.
    pub fn close(self) {
        debug!("Closing job store connection");
        drop(self.redis);
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn push_lane(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("LPUSH")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_lanes(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let mut conn = self.redis.clone();
        // BRPOP treats 0 as "block forever"
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOP checks its keys left to right and pops atomically
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(keys)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;
        Ok(popped)
    }

    async fn remove_from_list(&self, key: &str, member: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let removed: usize = redis::cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        redis::cmd("HSET")
            .arg(key)
            .arg(fields)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn hash_set_with_ttl(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.cmd("HSET").arg(key).arg(fields).ignore();
        pipe.cmd("EXPIRE").arg(key).arg(ttl.as_secs().max(1)).ignore();
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(fields)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = redis::cmd("SCARD").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }
}

/// Strips credentials from a Redis URL for logging.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
