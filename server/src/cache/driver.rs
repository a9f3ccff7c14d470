//! Cache Driver
//!
//! Thin typed surface over the Redis client. The facade talks to this trait
//! so the fallback logic can be exercised against a deterministic fake.

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;
use fred::prelude::{Client as RedisClient, Config as RedisConfig, Error as RedisError, ErrorKind as RedisErrorKind};
use thiserror::Error;
use tracing::info;

use crate::sanitize;

/// Errors surfaced by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache is unreachable (network-class failure). The facade treats
    /// these as a signal to enter fallback mode.
    #[error("cache unreachable: {0}")]
    Unavailable(String),
    /// The cache answered but the command failed.
    #[error("cache command failed: {0}")]
    Command(String),
    /// A stored value could not be decoded.
    #[error("cache value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    /// A typed update was rejected before reaching the cache.
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
}

impl CacheError {
    /// Whether this error means the cache itself is unreachable.
    pub const fn is_unavailability(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// The cache operations the facade consumes.
#[async_trait]
pub trait CacheDriver: Send + Sync {
    async fn ping(&self) -> Result<(), CacheError>;

    // Strings / counters
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    /// Set-if-absent with TTL; returns `true` when the key was created.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
    /// Seconds to live: -2 when absent, -1 when persistent.
    async fn ttl(&self, key: &str) -> Result<i64, CacheError>;
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    // Hashes
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError>;
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError>;

    // Lists
    async fn lpush(&self, key: &str, value: &str) -> Result<i64, CacheError>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError>;
    async fn llen(&self, key: &str) -> Result<i64, CacheError>;
    async fn rpop(&self, key: &str) -> Result<Option<String>, CacheError>;

    // Sorted sets
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), CacheError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, CacheError>;
    /// 0-based rank in descending score order.
    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, CacheError>;
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError>;
}

/// Production driver backed by `fred`.
pub struct RedisDriver {
    client: RedisClient,
}

impl RedisDriver {
    /// Connect to Redis and wait for the connection to come up.
    pub async fn connect(
        url: &str,
        password: Option<&str>,
        db: Option<u8>,
    ) -> Result<Self, CacheError> {
        let mut config = RedisConfig::from_url(url).map_err(classify)?;
        if let Some(password) = password {
            config.password = Some(password.to_owned());
        }
        if let Some(db) = db {
            config.database = Some(db);
        }
        let client = RedisClient::new(config, None, None, None);
        client.connect();
        client.wait_for_connect().await.map_err(classify)?;

        info!("Connected to Redis");
        Ok(Self { client })
    }

    /// Wrap an already-connected client (tests, shared pools).
    pub const fn from_client(client: RedisClient) -> Self {
        Self { client }
    }

    /// Close the connection during shutdown.
    pub async fn quit(&self) {
        let _ = self.client.quit().await;
    }
}

/// Map a fred error into [`CacheError`], using the transport error kind and
/// the sanitiser's unavailability patterns.
fn classify(e: RedisError) -> CacheError {
    let message = e.to_string();
    let network_kind = matches!(
        e.kind(),
        RedisErrorKind::IO | RedisErrorKind::Timeout | RedisErrorKind::Canceled
    );
    if network_kind || sanitize::is_unavailability(&message) {
        CacheError::Unavailable(message)
    } else {
        CacheError::Command(message)
    }
}

#[async_trait]
impl CacheDriver for RedisDriver {
    async fn ping(&self) -> Result<(), CacheError> {
        self.client.ping::<String>(None).await.map(|_| ()).map_err(classify)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.client.get(key).await.map_err(classify)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expiration = ttl.map(|d| Expiration::EX(d.as_secs() as i64));
        self.client
            .set::<(), _, _>(key, value, expiration, None, false)
            .await
            .map_err(classify)
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let created: Option<String> = self
            .client
            .set(
                key,
                value,
                Some(Expiration::EX(ttl.as_secs() as i64)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(classify)?;
        Ok(created.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.client.del::<(), _>(key).await.map_err(classify)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.client.exists(key).await.map_err(classify)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.client
            .expire::<(), _>(key, ttl.as_secs() as i64, None)
            .await
            .map_err(classify)
    }

    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        self.client.ttl(key).await.map_err(classify)
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.client.incr(key).await.map_err(classify)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.client
            .hset::<(), _, _>(key, (field, value))
            .await
            .map_err(classify)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.client.hget(key, field).await.map_err(classify)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        self.client.hdel::<(), _, _>(key, field).await.map_err(classify)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError> {
        let map: std::collections::HashMap<String, String> =
            self.client.hgetall(key).await.map_err(classify)?;
        Ok(map.into_iter().collect())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<i64, CacheError> {
        self.client.lpush(key, value).await.map_err(classify)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        self.client.lrange(key, start, stop).await.map_err(classify)
    }

    async fn llen(&self, key: &str) -> Result<i64, CacheError> {
        self.client.llen(key).await.map_err(classify)
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.client.rpop(key, None).await.map_err(classify)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), CacheError> {
        self.client
            .zadd::<(), _, _>(key, None, None, false, false, (score, member))
            .await
            .map_err(classify)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.client.zrem::<(), _, _>(key, member).await.map_err(classify)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, CacheError> {
        self.client.zscore(key, member).await.map_err(classify)
    }

    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, CacheError> {
        let rank: Option<i64> = self.client.zrevrank(key, member, false).await.map_err(classify)?;
        Ok(rank.and_then(|r| u64::try_from(r).ok()))
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        self.client
            .zrevrange(key, start, stop, true)
            .await
            .map_err(classify)
    }
}
