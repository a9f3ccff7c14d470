//! Cache Facade with In-Memory Fallback
//!
//! Typed cache surface for session state, participant sessions,
//! leaderboards, the answer buffer, join codes, and rate limits. Every
//! operation routes through fallback-aware primitives: when the cache is
//! unreachable the facade flips into fallback mode and serves the same
//! operations from an expiring in-process map, with degraded-mode alerts and
//! rate-limited warnings. Health probes (at most one per probe interval)
//! bring it back out.

mod answers;
mod driver;
mod joincode;
pub mod keys;
mod leaderboard;
mod memory;
mod participant;
mod ratelimit;
mod session;
#[doc(hidden)]
pub mod testutil;

pub use driver::{CacheDriver, CacheError, RedisDriver};
pub use joincode::generate_join_code;
pub use memory::MemoryStore;
pub use participant::ParticipantPatch;
pub use session::SessionStatePatch;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::alerts::{Alert, AlertSink};
use crate::sanitize;

/// Minimum spacing between degraded-operation warnings per operation name.
const DEGRADED_WARN_INTERVAL: Duration = Duration::from_secs(10);

struct FallbackState {
    active: bool,
    entered_at: Option<Instant>,
    last_probe_at: Option<Instant>,
}

/// Point-in-time facade status for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub fallback_mode: bool,
    /// Seconds spent in fallback so far, when degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_secs: Option<u64>,
    pub memory_entries: usize,
}

/// The cache facade. Cheap to clone via `Arc`; all state is shared.
pub struct CacheFacade {
    driver: Arc<dyn CacheDriver>,
    memory: Arc<MemoryStore>,
    alerts: Arc<AlertSink>,
    fallback: Mutex<FallbackState>,
    last_warn: DashMap<&'static str, Instant>,
    probe_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheFacade {
    pub fn new(
        driver: Arc<dyn CacheDriver>,
        alerts: Arc<AlertSink>,
        probe_interval: Duration,
    ) -> Self {
        Self {
            driver,
            memory: Arc::new(MemoryStore::new()),
            alerts,
            fallback: Mutex::new(FallbackState {
                active: false,
                entered_at: None,
                last_probe_at: None,
            }),
            last_warn: DashMap::new(),
            probe_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Start the background eviction task for the in-memory fallback map.
    pub fn start_sweeper(&self, interval: Duration) {
        let mut guard = self.sweeper.lock().expect("sweeper handle lock poisoned");
        if guard.is_some() {
            return;
        }
        *guard = Some(memory::spawn_sweeper(Arc::clone(&self.memory), interval));
    }

    /// Stop the eviction task. Part of orderly shutdown.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .expect("sweeper handle lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    /// Whether the facade is currently serving from process memory.
    pub fn fallback_mode(&self) -> bool {
        self.fallback.lock().expect("fallback lock poisoned").active
    }

    /// Facade status for the status endpoint.
    pub fn status(&self) -> CacheStatus {
        let state = self.fallback.lock().expect("fallback lock poisoned");
        CacheStatus {
            fallback_mode: state.active,
            degraded_secs: state
                .active
                .then(|| state.entered_at.map_or(0, |at| at.elapsed().as_secs())),
            memory_entries: self.memory.len(),
        }
    }

    /// Liveness check against the live cache, ignoring fallback state.
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.driver.ping().await
    }

    /// The in-memory fallback store (exposed for diagnostics and tests).
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    // ------------------------------------------------------------------
    // Fallback routing
    // ------------------------------------------------------------------

    /// Decide the path for one operation. In fallback mode this may run a
    /// rate-limited health probe and flip back to the live path.
    async fn use_fallback(&self) -> bool {
        let should_probe = {
            let mut state = self.fallback.lock().expect("fallback lock poisoned");
            if !state.active {
                return false;
            }
            let due = state
                .last_probe_at
                .is_none_or(|at| at.elapsed() >= self.probe_interval);
            if due {
                // Claim the probe slot before awaiting so concurrent
                // operations do not storm the cache.
                state.last_probe_at = Some(Instant::now());
            }
            due
        };

        if should_probe && self.driver.ping().await.is_ok() {
            self.exit_fallback();
            return false;
        }
        true
    }

    /// Flip into fallback mode (idempotent) and alert.
    fn enter_fallback(&self, operation: &'static str, error: &CacheError) {
        let newly_entered = {
            let mut state = self.fallback.lock().expect("fallback lock poisoned");
            if state.active {
                false
            } else {
                state.active = true;
                state.entered_at = Some(Instant::now());
                state.last_probe_at = Some(Instant::now());
                true
            }
        };
        if newly_entered {
            let redacted = sanitize::redact(&error.to_string());
            warn!(operation, error = %redacted, "Cache unreachable; entering fallback mode");
            self.alerts.emit(&Alert::CacheDegraded {
                operation: operation.to_owned(),
                error: redacted,
            });
        }
    }

    /// Leave fallback mode after a successful probe and alert.
    fn exit_fallback(&self) {
        let degraded_for = {
            let mut state = self.fallback.lock().expect("fallback lock poisoned");
            if !state.active {
                return;
            }
            state.active = false;
            state
                .entered_at
                .take()
                .map_or(Duration::ZERO, |at| at.elapsed())
        };
        info!(
            degraded_secs = degraded_for.as_secs(),
            "Cache recovered; leaving fallback mode"
        );
        self.alerts.emit(&Alert::CacheRecovered { degraded_for });
    }

    /// Rate-limited degraded-path warning, one per operation name per
    /// [`DEGRADED_WARN_INTERVAL`].
    fn note_degraded(&self, operation: &'static str) {
        let now = Instant::now();
        let mut due = false;
        self.last_warn
            .entry(operation)
            .and_modify(|at| {
                if now.duration_since(*at) >= DEGRADED_WARN_INTERVAL {
                    *at = now;
                    due = true;
                }
            })
            .or_insert_with(|| {
                due = true;
                now
            });
        if due {
            warn!(operation, "Cache degraded; serving from in-memory fallback");
        }
    }

    // ------------------------------------------------------------------
    // Fallback-aware primitives
    //
    // Typed surfaces compose these; each one tries the live cache, flips
    // into fallback on unavailability, and propagates every other error.
    // ------------------------------------------------------------------

    pub async fn kv_get(&self, op: &'static str, key: &str) -> Result<Option<String>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.kv_get(key));
        }
        match self.driver.get(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.kv_get(key))
            }
            other => other,
        }
    }

    pub async fn kv_set(
        &self,
        op: &'static str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.kv_set(key, value, ttl);
            return Ok(());
        }
        match self.driver.set(key, value, ttl).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.kv_set(key, value, ttl);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn kv_set_nx(
        &self,
        op: &'static str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.kv_set_nx(key, value, ttl));
        }
        match self.driver.set_nx(key, value, ttl).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.kv_set_nx(key, value, ttl))
            }
            other => other,
        }
    }

    pub async fn kv_del(&self, op: &'static str, key: &str) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.kv_del(key);
            return Ok(());
        }
        match self.driver.del(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.kv_del(key);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn kv_exists(&self, op: &'static str, key: &str) -> Result<bool, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.kv_exists(key));
        }
        match self.driver.exists(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.kv_exists(key))
            }
            other => other,
        }
    }

    pub async fn kv_ttl(&self, op: &'static str, key: &str) -> Result<i64, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.ttl(key));
        }
        match self.driver.ttl(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.ttl(key))
            }
            other => other,
        }
    }

    pub async fn kv_expire(
        &self,
        op: &'static str,
        key: &str,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.expire(key, ttl);
            return Ok(());
        }
        match self.driver.expire(key, ttl).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.expire(key, ttl);
                Ok(())
            }
            other => other,
        }
    }

    /// Windowed counter: INCR, with the window TTL applied when the counter
    /// is created.
    pub async fn kv_incr_window(
        &self,
        op: &'static str,
        key: &str,
        window: Duration,
    ) -> Result<i64, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.incr(key, Some(window)));
        }
        match self.driver.incr(key).await {
            Ok(count) => {
                if count == 1 {
                    // First hit in the window: arm the expiry. Failure here
                    // is logged but does not fail the caller.
                    if let Err(e) = self.driver.expire(key, window).await {
                        warn!(key, error = %e, "Failed to arm rate-limit window");
                    }
                }
                Ok(count)
            }
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.incr(key, Some(window)))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn hash_set(
        &self,
        op: &'static str,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.hset(key, field, value, ttl);
            return Ok(());
        }
        match self.driver.hset(key, field, value).await {
            Ok(()) => {
                if let Some(ttl) = ttl {
                    self.driver.expire(key, ttl).await.ok();
                }
                Ok(())
            }
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.hset(key, field, value, ttl);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn hash_get(
        &self,
        op: &'static str,
        key: &str,
        field: &str,
    ) -> Result<Option<String>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.hget(key, field));
        }
        match self.driver.hget(key, field).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.hget(key, field))
            }
            other => other,
        }
    }

    pub async fn hash_del(
        &self,
        op: &'static str,
        key: &str,
        field: &str,
    ) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.hdel(key, field);
            return Ok(());
        }
        match self.driver.hdel(key, field).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.hdel(key, field);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn hash_getall(
        &self,
        op: &'static str,
        key: &str,
    ) -> Result<Vec<(String, String)>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.hgetall(key));
        }
        match self.driver.hgetall(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.hgetall(key))
            }
            other => other,
        }
    }

    pub async fn list_push(
        &self,
        op: &'static str,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.lpush(key, value, ttl));
        }
        match self.driver.lpush(key, value).await {
            Ok(len) => {
                if let Some(ttl) = ttl {
                    self.driver.expire(key, ttl).await.ok();
                }
                Ok(len)
            }
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.lpush(key, value, ttl))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_range(
        &self,
        op: &'static str,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.lrange(key, start, stop));
        }
        match self.driver.lrange(key, start, stop).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.lrange(key, start, stop))
            }
            other => other,
        }
    }

    pub async fn list_len(&self, op: &'static str, key: &str) -> Result<i64, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.llen(key));
        }
        match self.driver.llen(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.llen(key))
            }
            other => other,
        }
    }

    /// Pop from the tail (the oldest element of an lpush-fed list).
    pub async fn list_pop_tail(
        &self,
        op: &'static str,
        key: &str,
    ) -> Result<Option<String>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.rpop(key));
        }
        match self.driver.rpop(key).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.rpop(key))
            }
            other => other,
        }
    }

    pub async fn zset_add(
        &self,
        op: &'static str,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.zadd(key, score, member, ttl);
            return Ok(());
        }
        match self.driver.zadd(key, score, member).await {
            Ok(()) => {
                if let Some(ttl) = ttl {
                    self.driver.expire(key, ttl).await.ok();
                }
                Ok(())
            }
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.zadd(key, score, member, ttl);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn zset_rem(
        &self,
        op: &'static str,
        key: &str,
        member: &str,
    ) -> Result<(), CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            self.memory.zrem(key, member);
            return Ok(());
        }
        match self.driver.zrem(key, member).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                self.memory.zrem(key, member);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn zset_score(
        &self,
        op: &'static str,
        key: &str,
        member: &str,
    ) -> Result<Option<f64>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.zscore(key, member));
        }
        match self.driver.zscore(key, member).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.zscore(key, member))
            }
            other => other,
        }
    }

    pub async fn zset_revrank(
        &self,
        op: &'static str,
        key: &str,
        member: &str,
    ) -> Result<Option<u64>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.zrevrank(key, member));
        }
        match self.driver.zrevrank(key, member).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.zrevrank(key, member))
            }
            other => other,
        }
    }

    pub async fn zset_revrange(
        &self,
        op: &'static str,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        if self.use_fallback().await {
            self.note_degraded(op);
            return Ok(self.memory.zrevrange_withscores(key, start, stop));
        }
        match self.driver.zrevrange_withscores(key, start, stop).await {
            Err(e) if e.is_unavailability() => {
                self.enter_fallback(op, &e);
                self.note_degraded(op);
                Ok(self.memory.zrevrange_withscores(key, start, stop))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testutil::FlakyDriver;

    fn flaky_setup() -> (Arc<CacheFacade>, Arc<std::sync::atomic::AtomicBool>, Arc<AlertSink>) {
        let driver = FlakyDriver::new();
        let switch = driver.failure_switch();
        let alerts = Arc::new(AlertSink::new());
        let facade = Arc::new(CacheFacade::new(
            Arc::new(driver),
            Arc::clone(&alerts),
            Duration::from_secs(30),
        ));
        (facade, switch, alerts)
    }

    #[tokio::test]
    async fn healthy_facade_stays_live() {
        let (facade, _switch, _alerts) = flaky_setup();
        facade.kv_set("t", "k", "v", None).await.unwrap();
        assert_eq!(facade.kv_get("t", "k").await.unwrap(), Some("v".into()));
        assert!(!facade.fallback_mode());
        assert!(facade.memory().is_empty());
    }

    #[tokio::test]
    async fn outage_flips_into_fallback_and_alerts_once() {
        let (facade, switch, alerts) = flaky_setup();
        let degraded = Arc::new(AtomicUsize::new(0));
        {
            let degraded = Arc::clone(&degraded);
            alerts.subscribe(move |alert| {
                if matches!(alert, Alert::CacheDegraded { .. }) {
                    degraded.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        switch.store(true, Ordering::SeqCst);
        facade.kv_set("t", "k", "v1", None).await.unwrap();
        facade.kv_set("t", "k2", "v2", None).await.unwrap();

        assert!(facade.fallback_mode());
        assert_eq!(degraded.load(Ordering::SeqCst), 1, "entry alert fires once");
        // Writes issued during the degraded window are readable.
        assert_eq!(facade.kv_get("t", "k").await.unwrap(), Some("v1".into()));
        assert_eq!(facade.kv_get("t", "k2").await.unwrap(), Some("v2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_exits_fallback_after_interval() {
        let (facade, switch, alerts) = flaky_setup();
        let recovered = Arc::new(AtomicUsize::new(0));
        {
            let recovered = Arc::clone(&recovered);
            alerts.subscribe(move |alert| {
                if matches!(alert, Alert::CacheRecovered { .. }) {
                    recovered.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        switch.store(true, Ordering::SeqCst);
        facade.kv_set("t", "k", "v", None).await.unwrap();
        assert!(facade.fallback_mode());

        // Cache heals, but the probe window has not elapsed: still degraded.
        switch.store(false, Ordering::SeqCst);
        facade.kv_get("t", "k").await.unwrap();
        assert!(facade.fallback_mode());

        // Past the probe interval the next operation probes and recovers.
        tokio::time::advance(Duration::from_secs(31)).await;
        facade.kv_get("t", "k").await.unwrap();
        assert!(!facade.fallback_mode());
        assert_eq!(recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn command_errors_propagate_without_fallback() {
        let (facade, _switch, _alerts) = flaky_setup();
        // Store junk, then ask for typed decode through a surface op.
        facade.kv_set("t", "session:s9:state", "not-json", None).await.unwrap();
        let err = facade
            .get_session_state(&qz_common::SessionId::new("s9"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
        assert!(!facade.fallback_mode());
    }

    #[tokio::test]
    async fn sweeper_start_stop_is_idempotent() {
        let (facade, _switch, _alerts) = flaky_setup();
        facade.start_sweeper(Duration::from_secs(60));
        facade.start_sweeper(Duration::from_secs(60));
        facade.stop_sweeper();
        facade.stop_sweeper();
    }
}
