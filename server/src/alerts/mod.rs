//! Operational Alerts
//!
//! Degradation and recovery events fan out to pluggable sinks (monitoring
//! hooks, tests). A misbehaving callback must not take down the caller or
//! starve the other callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{error, info, warn};

/// A degradation or recovery event emitted by the resilience components.
#[derive(Debug, Clone)]
pub enum Alert {
    /// The cache became unreachable; operations now run from process memory.
    CacheDegraded {
        /// Operation that observed the failure.
        operation: String,
        /// Redacted description of the failure.
        error: String,
    },
    /// The cache came back; live operations resumed.
    CacheRecovered {
        /// How long the facade served from memory.
        degraded_for: Duration,
    },
    /// The durable store's circuit opened; writes are being deferred.
    StoreUnavailable,
    /// The durable store's circuit closed again.
    StoreRecovered,
    /// The recovery worker started draining pending writes.
    RecoveryStarted { pending: usize },
    /// A recovery run finished. `failed` counts writes left in the queue.
    RecoveryCompleted { processed: usize, failed: usize },
    /// A recovery run aborted before completing.
    RecoveryAborted { error: String },
    /// The answer batcher exhausted its retries and parked a batch.
    AnswersParked { count: usize },
}

type AlertCallback = Arc<dyn Fn(&Alert) + Send + Sync>;

/// Observer-style fan-out of [`Alert`]s to registered callbacks.
#[derive(Default)]
pub struct AlertSink {
    callbacks: RwLock<Vec<(u64, AlertCallback)>>,
    next_id: AtomicU64,
}

impl AlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; returns a handle usable with [`unsubscribe`].
    ///
    /// [`unsubscribe`]: Self::unsubscribe
    pub fn subscribe(&self, callback: impl Fn(&Alert) + Send + Sync + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .expect("alert sink lock poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a previously registered callback. Unknown handles are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.callbacks
            .write()
            .expect("alert sink lock poisoned")
            .retain(|(cb_id, _)| *cb_id != id);
    }

    /// Fan an alert out to every callback.
    ///
    /// A panicking callback is logged and skipped; the remaining callbacks
    /// still run.
    pub fn emit(&self, alert: &Alert) {
        let callbacks: Vec<AlertCallback> = self
            .callbacks
            .read()
            .expect("alert sink lock poisoned")
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(alert))).is_err() {
                error!(?alert, "Alert callback panicked");
            }
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .expect("alert sink lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Register the default operator-log sink.
///
/// Severity follows the event: degradations warn, hard failures error,
/// recoveries inform.
pub fn register_log_sink(sink: &AlertSink) -> u64 {
    sink.subscribe(|alert| match alert {
        Alert::CacheDegraded { operation, error } => {
            warn!(operation = %operation, error = %error, "Cache unreachable, serving from memory");
        }
        Alert::CacheRecovered { degraded_for } => {
            info!(degraded_secs = degraded_for.as_secs(), "Cache recovered");
        }
        Alert::StoreUnavailable => {
            warn!("Durable store unavailable, deferring writes");
        }
        Alert::StoreRecovered => {
            info!("Durable store recovered");
        }
        Alert::RecoveryStarted { pending } => {
            info!(pending, "Pending-write recovery started");
        }
        Alert::RecoveryCompleted { processed, failed } => {
            if *failed == 0 {
                info!(processed, "Pending-write recovery completed");
            } else {
                warn!(processed, failed, "Pending-write recovery completed with errors");
            }
        }
        Alert::RecoveryAborted { error } => {
            error!(error = %error, "Pending-write recovery aborted");
        }
        Alert::AnswersParked { count } => {
            error!(count, "Answer batch parked after exhausting retries");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_reaches_all_subscribers() {
        let sink = AlertSink::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            sink.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        sink.emit(&Alert::StoreUnavailable);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unsubscribe_removes_only_that_callback() {
        let sink = AlertSink::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let keep = {
            let hits = Arc::clone(&hits);
            sink.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let drop_id = {
            let hits = Arc::clone(&hits);
            sink.subscribe(move |_| {
                hits.fetch_add(10, Ordering::SeqCst);
            })
        };

        sink.unsubscribe(drop_id);
        sink.emit(&Alert::StoreRecovered);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_ne!(keep, drop_id);
    }

    #[test]
    fn panicking_callback_does_not_disrupt_others() {
        let sink = AlertSink::new();
        let hits = Arc::new(AtomicUsize::new(0));

        sink.subscribe(|_| panic!("bad sink"));
        {
            let hits = Arc::clone(&hits);
            sink.subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        sink.emit(&Alert::RecoveryStarted { pending: 2 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
