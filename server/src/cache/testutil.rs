//! Test Drivers
//!
//! Deterministic [`CacheDriver`] implementations for unit tests: one that is
//! permanently unreachable and one fully functional in-memory driver with a
//! failure switch for simulating outages and recoveries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::driver::{CacheDriver, CacheError};
use super::memory::MemoryStore;

fn unavailable() -> CacheError {
    CacheError::Unavailable("connection refused".into())
}

/// Driver that always reports the cache as unreachable, forcing every
/// facade operation onto the in-memory path.
pub struct DownDriver;

#[async_trait]
impl CacheDriver for DownDriver {
    async fn ping(&self) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
        Err(unavailable())
    }
    async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn set_nx(&self, _: &str, _: &str, _: Duration) -> Result<bool, CacheError> {
        Err(unavailable())
    }
    async fn del(&self, _: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn exists(&self, _: &str) -> Result<bool, CacheError> {
        Err(unavailable())
    }
    async fn expire(&self, _: &str, _: Duration) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn ttl(&self, _: &str) -> Result<i64, CacheError> {
        Err(unavailable())
    }
    async fn incr(&self, _: &str) -> Result<i64, CacheError> {
        Err(unavailable())
    }
    async fn hset(&self, _: &str, _: &str, _: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn hget(&self, _: &str, _: &str) -> Result<Option<String>, CacheError> {
        Err(unavailable())
    }
    async fn hdel(&self, _: &str, _: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn hgetall(&self, _: &str) -> Result<Vec<(String, String)>, CacheError> {
        Err(unavailable())
    }
    async fn lpush(&self, _: &str, _: &str) -> Result<i64, CacheError> {
        Err(unavailable())
    }
    async fn lrange(&self, _: &str, _: i64, _: i64) -> Result<Vec<String>, CacheError> {
        Err(unavailable())
    }
    async fn llen(&self, _: &str) -> Result<i64, CacheError> {
        Err(unavailable())
    }
    async fn rpop(&self, _: &str) -> Result<Option<String>, CacheError> {
        Err(unavailable())
    }
    async fn zadd(&self, _: &str, _: f64, _: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn zrem(&self, _: &str, _: &str) -> Result<(), CacheError> {
        Err(unavailable())
    }
    async fn zscore(&self, _: &str, _: &str) -> Result<Option<f64>, CacheError> {
        Err(unavailable())
    }
    async fn zrevrank(&self, _: &str, _: &str) -> Result<Option<u64>, CacheError> {
        Err(unavailable())
    }
    async fn zrevrange_withscores(
        &self,
        _: &str,
        _: i64,
        _: i64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        Err(unavailable())
    }
}

/// Fully functional in-memory driver with a failure switch.
///
/// While `failing` is set, every call returns an unavailability error; flip
/// it back and the driver works again, retaining its data.
pub struct FlakyDriver {
    store: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl FlakyDriver {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for toggling the outage from tests.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheDriver for FlakyDriver {
    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.store.kv_get(key))
    }
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check()?;
        self.store.kv_set(key, value, ttl);
        Ok(())
    }
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check()?;
        Ok(self.store.kv_set_nx(key, value, ttl))
    }
    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.store.kv_del(key);
        Ok(())
    }
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        Ok(self.store.kv_exists(key))
    }
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.store.expire(key, ttl);
        Ok(())
    }
    async fn ttl(&self, key: &str) -> Result<i64, CacheError> {
        self.check()?;
        Ok(self.store.ttl(key))
    }
    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.check()?;
        Ok(self.store.incr(key, None))
    }
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.check()?;
        self.store.hset(key, field, value, None);
        Ok(())
    }
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.store.hget(key, field))
    }
    async fn hdel(&self, key: &str, field: &str) -> Result<(), CacheError> {
        self.check()?;
        self.store.hdel(key, field);
        Ok(())
    }
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, CacheError> {
        self.check()?;
        Ok(self.store.hgetall(key))
    }
    async fn lpush(&self, key: &str, value: &str) -> Result<i64, CacheError> {
        self.check()?;
        Ok(self.store.lpush(key, value, None))
    }
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        self.check()?;
        Ok(self.store.lrange(key, start, stop))
    }
    async fn llen(&self, key: &str) -> Result<i64, CacheError> {
        self.check()?;
        Ok(self.store.llen(key))
    }
    async fn rpop(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.store.rpop(key))
    }
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), CacheError> {
        self.check()?;
        self.store.zadd(key, score, member, None);
        Ok(())
    }
    async fn zrem(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.check()?;
        self.store.zrem(key, member);
        Ok(())
    }
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, CacheError> {
        self.check()?;
        Ok(self.store.zscore(key, member))
    }
    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, CacheError> {
        self.check()?;
        Ok(self.store.zrevrank(key, member))
    }
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        self.check()?;
        Ok(self.store.zrevrange_withscores(key, start, stop))
    }
}
