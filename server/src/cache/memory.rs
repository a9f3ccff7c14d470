//! In-Memory Fallback Store
//!
//! Process-local shadow of the cache used while Redis is unreachable.
//! Mirrors the primitive shapes the facade needs (KV, hash, list, sorted
//! set, counters), each in its own concurrently locked sub-map with absolute
//! expiries. Values are copied in and out, never aliased.
//!
//! Entries older than their TTL are never returned; a background sweeper
//! additionally evicts them so an extended outage does not grow memory
//! without bound.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// The fallback store. Cheap to share; all sub-maps are sharded.
#[derive(Default)]
pub struct MemoryStore {
    kv: DashMap<String, Entry<String>>,
    counters: DashMap<String, Entry<i64>>,
    hashes: DashMap<String, Entry<HashMap<String, String>>>,
    lists: DashMap<String, Entry<VecDeque<String>>>,
    zsets: DashMap<String, Entry<HashMap<String, f64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // KV
    // ------------------------------------------------------------------

    pub fn kv_get(&self, key: &str) -> Option<String> {
        let entry = self.kv.get(key)?;
        (!entry.expired()).then(|| entry.value.clone())
    }

    pub fn kv_set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        self.kv.insert(key.to_owned(), Entry::new(value.to_owned(), ttl));
    }

    /// Set-if-absent; returns `true` when the key was created.
    pub fn kv_set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        // Expired entries count as absent.
        if self.kv.get(key).is_some_and(|e| !e.expired()) {
            return false;
        }
        self.kv
            .insert(key.to_owned(), Entry::new(value.to_owned(), Some(ttl)));
        true
    }

    pub fn kv_del(&self, key: &str) {
        self.kv.remove(key);
        self.counters.remove(key);
        self.hashes.remove(key);
        self.lists.remove(key);
        self.zsets.remove(key);
    }

    pub fn kv_exists(&self, key: &str) -> bool {
        self.kv.get(key).is_some_and(|e| !e.expired())
            || self.counters.get(key).is_some_and(|e| !e.expired())
            || self.hashes.get(key).is_some_and(|e| !e.expired())
            || self.lists.get(key).is_some_and(|e| !e.expired())
            || self.zsets.get(key).is_some_and(|e| !e.expired())
    }

    /// Remaining TTL in seconds: -2 when absent, -1 when persistent.
    pub fn ttl(&self, key: &str) -> i64 {
        let expires_at = if let Some(e) = self.kv.get(key) {
            if e.expired() {
                return -2;
            }
            e.expires_at
        } else if let Some(e) = self.hashes.get(key) {
            if e.expired() {
                return -2;
            }
            e.expires_at
        } else if let Some(e) = self.counters.get(key) {
            if e.expired() {
                return -2;
            }
            e.expires_at
        } else {
            return -2;
        };
        expires_at.map_or(-1, |at| {
            let remaining = at.saturating_duration_since(Instant::now());
            remaining.as_secs() as i64
        })
    }

    /// Refresh the expiry of an existing key, touching whichever sub-map
    /// holds it.
    pub fn expire(&self, key: &str, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        if let Some(mut e) = self.kv.get_mut(key) {
            e.expires_at = Some(deadline);
        }
        if let Some(mut e) = self.counters.get_mut(key) {
            e.expires_at = Some(deadline);
        }
        if let Some(mut e) = self.hashes.get_mut(key) {
            e.expires_at = Some(deadline);
        }
        if let Some(mut e) = self.lists.get_mut(key) {
            e.expires_at = Some(deadline);
        }
        if let Some(mut e) = self.zsets.get_mut(key) {
            e.expires_at = Some(deadline);
        }
    }

    /// Increment a windowed counter. The window TTL applies from the first
    /// increment only, matching `INCR` + `EXPIRE NX` semantics.
    pub fn incr(&self, key: &str, window: Option<Duration>) -> i64 {
        let mut entry = self
            .counters
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(0, window));
        if entry.expired() {
            *entry = Entry::new(0, window);
        }
        entry.value += 1;
        entry.value
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    pub fn hset(&self, key: &str, field: &str, value: &str, ttl: Option<Duration>) {
        let mut entry = self
            .hashes
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(HashMap::new(), ttl));
        if entry.expired() {
            *entry = Entry::new(HashMap::new(), ttl);
        }
        entry.value.insert(field.to_owned(), value.to_owned());
    }

    pub fn hget(&self, key: &str, field: &str) -> Option<String> {
        let entry = self.hashes.get(key)?;
        if entry.expired() {
            return None;
        }
        entry.value.get(field).cloned()
    }

    pub fn hdel(&self, key: &str, field: &str) {
        if let Some(mut entry) = self.hashes.get_mut(key) {
            entry.value.remove(field);
        }
    }

    pub fn hgetall(&self, key: &str) -> Vec<(String, String)> {
        match self.hashes.get(key) {
            Some(entry) if !entry.expired() => entry
                .value
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------

    pub fn lpush(&self, key: &str, value: &str, ttl: Option<Duration>) -> i64 {
        let mut entry = self
            .lists
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(VecDeque::new(), ttl));
        if entry.expired() {
            *entry = Entry::new(VecDeque::new(), ttl);
        }
        entry.value.push_front(value.to_owned());
        entry.value.len() as i64
    }

    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let entry = match self.lists.get(key) {
            Some(e) if !e.expired() => e,
            _ => return Vec::new(),
        };
        let len = entry.value.len() as i64;
        let normalize = |idx: i64| -> i64 {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx.min(len.saturating_sub(1))
            }
        };
        if len == 0 || start >= len {
            return Vec::new();
        }
        let (from, to) = (normalize(start), normalize(stop));
        if from > to {
            return Vec::new();
        }
        entry
            .value
            .iter()
            .skip(from as usize)
            .take((to - from + 1) as usize)
            .cloned()
            .collect()
    }

    pub fn llen(&self, key: &str) -> i64 {
        match self.lists.get(key) {
            Some(e) if !e.expired() => e.value.len() as i64,
            _ => 0,
        }
    }

    pub fn rpop(&self, key: &str) -> Option<String> {
        let mut entry = self.lists.get_mut(key)?;
        if entry.expired() {
            return None;
        }
        entry.value.pop_back()
    }

    // ------------------------------------------------------------------
    // Sorted sets
    // ------------------------------------------------------------------

    pub fn zadd(&self, key: &str, score: f64, member: &str, ttl: Option<Duration>) {
        let mut entry = self
            .zsets
            .entry(key.to_owned())
            .or_insert_with(|| Entry::new(HashMap::new(), ttl));
        if entry.expired() {
            *entry = Entry::new(HashMap::new(), ttl);
        }
        entry.value.insert(member.to_owned(), score);
    }

    pub fn zrem(&self, key: &str, member: &str) {
        if let Some(mut entry) = self.zsets.get_mut(key) {
            entry.value.remove(member);
        }
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        let entry = self.zsets.get(key)?;
        if entry.expired() {
            return None;
        }
        entry.value.get(member).copied()
    }

    /// Members in descending score order, ties broken lexically for
    /// determinism.
    fn sorted_desc(&self, key: &str) -> Vec<(String, f64)> {
        let entry = match self.zsets.get(key) {
            Some(e) if !e.expired() => e,
            _ => return Vec::new(),
        };
        let mut members: Vec<(String, f64)> = entry
            .value
            .iter()
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        members
    }

    pub fn zrevrank(&self, key: &str, member: &str) -> Option<u64> {
        self.sorted_desc(key)
            .iter()
            .position(|(m, _)| m == member)
            .map(|p| p as u64)
    }

    pub fn zrevrange_withscores(&self, key: &str, start: i64, stop: i64) -> Vec<(String, f64)> {
        let sorted = self.sorted_desc(key);
        let len = sorted.len() as i64;
        if len == 0 || start >= len {
            return Vec::new();
        }
        let normalize = |idx: i64| -> i64 {
            if idx < 0 {
                (len + idx).max(0)
            } else {
                idx.min(len - 1)
            }
        };
        let (from, to) = (normalize(start), normalize(stop));
        if from > to {
            return Vec::new();
        }
        sorted
            .into_iter()
            .skip(from as usize)
            .take((to - from + 1) as usize)
            .collect()
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Evict expired entries, one sub-map at a time.
    pub fn sweep(&self) -> usize {
        let mut evicted = 0;
        let before = self.len();
        self.kv.retain(|_, e| !e.expired());
        self.counters.retain(|_, e| !e.expired());
        self.hashes.retain(|_, e| !e.expired());
        self.lists.retain(|_, e| !e.expired());
        self.zsets.retain(|_, e| !e.expired());
        evicted += before.saturating_sub(self.len());
        evicted
    }

    /// Total live + expired entry count across sub-maps.
    pub fn len(&self) -> usize {
        self.kv.len() + self.counters.len() + self.hashes.len() + self.lists.len() + self.zsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything (used when leaving the degraded window behind).
    pub fn clear(&self) {
        self.kv.clear();
        self.counters.clear();
        self.hashes.clear();
        self.lists.clear();
        self.zsets.clear();
    }
}

/// Start the periodic eviction task. The first tick is consumed immediately
/// so startup does not pay for a sweep.
pub fn spawn_sweeper(store: Arc<MemoryStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = store.sweep();
            if evicted > 0 {
                debug!(evicted, "Swept expired fallback entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_never_returned() {
        let store = MemoryStore::new();
        store.kv_set("k", "v", Some(Duration::from_secs(5)));
        assert_eq!(store.kv_get("k"), Some("v".to_owned()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.kv_get("k"), None);
        assert!(!store.kv_exists("k"));
        assert_eq!(store.ttl("k"), -2);
    }

    #[tokio::test]
    async fn values_are_copies_not_aliases() {
        let store = MemoryStore::new();
        store.kv_set("k", "original", None);
        let mut copy = store.kv_get("k").unwrap();
        copy.push_str("-mutated");
        assert_eq!(store.kv_get("k"), Some("original".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_window_applies_from_first_increment() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("c", Some(Duration::from_secs(60))), 1);
        assert_eq!(store.incr("c", Some(Duration::from_secs(60))), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        // Window elapsed: the counter restarts.
        assert_eq!(store.incr("c", Some(Duration::from_secs(60))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_nx_respects_expiry() {
        let store = MemoryStore::new();
        assert!(store.kv_set_nx("k", "1", Duration::from_secs(10)));
        assert!(!store.kv_set_nx("k", "2", Duration::from_secs(10)));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.kv_set_nx("k", "3", Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn list_semantics_match_redis() {
        let store = MemoryStore::new();
        store.lpush("l", "a", None);
        store.lpush("l", "b", None);
        store.lpush("l", "c", None);
        // Newest first.
        assert_eq!(store.lrange("l", 0, -1), vec!["c", "b", "a"]);
        assert_eq!(store.llen("l"), 3);
        // rpop takes the oldest.
        assert_eq!(store.rpop("l"), Some("a".to_owned()));
        assert_eq!(store.lrange("l", 0, 0), vec!["c"]);
    }

    #[tokio::test]
    async fn zset_orders_descending_with_rank() {
        let store = MemoryStore::new();
        store.zadd("z", 10.0, "alice", None);
        store.zadd("z", 30.0, "bob", None);
        store.zadd("z", 20.0, "carol", None);

        assert_eq!(store.zrevrank("z", "bob"), Some(0));
        assert_eq!(store.zrevrank("z", "carol"), Some(1));
        assert_eq!(store.zrevrank("z", "alice"), Some(2));
        assert_eq!(store.zrevrank("z", "nobody"), None);

        let top2 = store.zrevrange_withscores("z", 0, 1);
        assert_eq!(top2.len(), 2);
        assert_eq!(top2[0].0, "bob");
        assert_eq!(top2[1].0, "carol");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_expired() {
        let store = MemoryStore::new();
        store.kv_set("short", "v", Some(Duration::from_secs(5)));
        store.kv_set("long", "v", Some(Duration::from_secs(500)));
        store.hset("h", "f", "v", Some(Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(10)).await;
        let evicted = store.sweep();
        assert_eq!(evicted, 2);
        assert_eq!(store.kv_get("long"), Some("v".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_refreshes_ttl() {
        let store = MemoryStore::new();
        store.kv_set("k", "v", Some(Duration::from_secs(5)));
        tokio::time::advance(Duration::from_secs(4)).await;
        store.expire("k", Duration::from_secs(300));
        tokio::time::advance(Duration::from_secs(200)).await;
        assert_eq!(store.kv_get("k"), Some("v".to_owned()));
        let remaining = store.ttl("k");
        assert!(remaining > 0 && remaining <= 100);
    }
}
