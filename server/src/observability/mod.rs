//! Performance Monitoring
//!
//! Lightweight in-process operation timings. External metrics export is a
//! deployment concern; the backend keeps rolling per-operation stats that
//! the status endpoint (and tests) can read directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

/// Rolling stats for one named operation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
    pub last_ms: u64,
}

impl OpStats {
    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

/// Collects operation timings by name.
#[derive(Default)]
pub struct PerfMonitor {
    ops: Mutex<HashMap<&'static str, OpStats>>,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time `fut` under `name`.
    pub async fn measure<T, Fut>(&self, name: &'static str, fut: Fut) -> T
    where
        Fut: std::future::Future<Output = T>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.record(name, start.elapsed().as_millis() as u64);
        result
    }

    /// Record one completed operation.
    pub fn record(&self, name: &'static str, elapsed_ms: u64) {
        let mut ops = self.ops.lock().expect("perf monitor lock poisoned");
        let stats = ops.entry(name).or_default();
        stats.count += 1;
        stats.total_ms += elapsed_ms;
        stats.max_ms = stats.max_ms.max(elapsed_ms);
        stats.last_ms = elapsed_ms;
        debug!(operation = name, elapsed_ms, "Operation timed");
    }

    /// Snapshot of all operations, keyed by name.
    pub fn snapshot(&self) -> HashMap<&'static str, OpStats> {
        self.ops.lock().expect("perf monitor lock poisoned").clone()
    }

    pub fn reset(&self) {
        self.ops.lock().expect("perf monitor lock poisoned").clear();
    }
}
