//! Circuit Breaker
//!
//! Per-dependency three-state breaker (Closed → Open → HalfOpen) gating
//! async operations. The breaker counts failures without inspecting them;
//! once the threshold trips, calls are rejected immediately with
//! [`BreakerError::Open`] until the reset timeout elapses, after which a
//! single probe decides whether to close again.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Breaker state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Operations pass through; failures are counted.
    Closed,
    /// Operations are rejected without being invoked.
    Open,
    /// The next operation is a probe deciding Open vs Closed.
    HalfOpen,
}

/// Breaker tuning for one dependency class.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe.
    pub reset_timeout: Duration,
}

impl BreakerConfig {
    /// Preset for the durable store.
    pub const fn database() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }

    /// Preset for the cache.
    pub const fn cache() -> Self {
        Self {
            failure_threshold: 2,
            reset_timeout: Duration::from_secs(10),
        }
    }

    /// Preset for third-party APIs.
    pub const fn external_api() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    Open {
        /// Remaining wait before a probe will be admitted.
        retry_after_ms: u64,
    },
    /// The operation ran and failed; the original error is preserved.
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether this is the circuit-open rejection (operation never ran).
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { retry_after_ms } => {
                write!(f, "circuit open; retry in {retry_after_ms} ms")
            }
            Self::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}

/// Point-in-time breaker status for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerStatus {
    pub state: BreakerState,
    pub failure_count: u32,
    /// Milliseconds until a probe is admitted, when open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

type TransitionListener = Arc<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// A circuit breaker guarding one dependency instance.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    listeners: RwLock<Vec<TransitionListener>>,
}

impl CircuitBreaker {
    /// Create a breaker named for its dependency (used in logs).
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a state-transition listener, invoked as `(from, to)`.
    ///
    /// Listeners run outside the state lock, so they may call back into the
    /// breaker.
    pub fn on_transition(&self, listener: impl Fn(BreakerState, BreakerState) + Send + Sync + 'static) {
        self.listeners
            .write()
            .expect("breaker listener lock poisoned")
            .push(Arc::new(listener));
    }

    /// Run `op` through the breaker.
    ///
    /// Closed: runs `op`; success resets the failure count, failure counts
    /// toward the threshold. Open: rejects with [`BreakerError::Open`] until
    /// the reset timeout has elapsed, then admits one probe in HalfOpen.
    /// HalfOpen: a successful probe closes the circuit, a failed one
    /// re-opens it.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut transitions: Vec<(BreakerState, BreakerState)> = Vec::new();

        // Admission decision under the state lock.
        let _admitted = {
            let mut inner = self.inner.lock().expect("breaker state lock poisoned");
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => true,
                BreakerState::Open => {
                    let elapsed = inner
                        .last_failure_at
                        .map_or(Duration::MAX, |at| at.elapsed());
                    if elapsed >= self.config.reset_timeout {
                        transitions.push((BreakerState::Open, BreakerState::HalfOpen));
                        inner.state = BreakerState::HalfOpen;
                        true
                    } else {
                        let retry_after_ms =
                            (self.config.reset_timeout - elapsed).as_millis() as u64;
                        drop(inner);
                        return Err(BreakerError::Open { retry_after_ms });
                    }
                }
            }
        };
        self.notify(&mut transitions);

        let result = op().await;

        // Outcome bookkeeping under the state lock.
        {
            let mut inner = self.inner.lock().expect("breaker state lock poisoned");
            match &result {
                Ok(_) => {
                    if inner.state != BreakerState::Closed {
                        transitions.push((inner.state, BreakerState::Closed));
                        inner.state = BreakerState::Closed;
                    }
                    inner.failure_count = 0;
                    inner.last_failure_at = None;
                }
                Err(_) => {
                    inner.last_failure_at = Some(Instant::now());
                    match inner.state {
                        BreakerState::HalfOpen => {
                            // Failed probe: straight back to Open.
                            transitions.push((BreakerState::HalfOpen, BreakerState::Open));
                            inner.state = BreakerState::Open;
                        }
                        BreakerState::Closed => {
                            inner.failure_count += 1;
                            if inner.failure_count >= self.config.failure_threshold {
                                transitions.push((BreakerState::Closed, BreakerState::Open));
                                inner.state = BreakerState::Open;
                                warn!(
                                    breaker = %self.name,
                                    failures = inner.failure_count,
                                    "Circuit opened"
                                );
                            }
                        }
                        BreakerState::Open => {}
                    }
                }
            }
        }
        self.notify(&mut transitions);

        result.map_err(BreakerError::Inner)
    }

    /// Force the breaker back to Closed and clear counters.
    pub fn reset(&self) {
        let mut transitions = Vec::new();
        {
            let mut inner = self.inner.lock().expect("breaker state lock poisoned");
            if inner.state != BreakerState::Closed {
                transitions.push((inner.state, BreakerState::Closed));
            }
            inner.state = BreakerState::Closed;
            inner.failure_count = 0;
            inner.last_failure_at = None;
        }
        debug!(breaker = %self.name, "Circuit manually reset");
        self.notify(&mut transitions);
    }

    /// Current state without side effects.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker state lock poisoned").state
    }

    /// Snapshot for the status endpoint.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock().expect("breaker state lock poisoned");
        let retry_after_ms = match inner.state {
            BreakerState::Open => inner.last_failure_at.map(|at| {
                self.config
                    .reset_timeout
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64
            }),
            _ => None,
        };
        BreakerStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            retry_after_ms,
        }
    }

    /// Dependency name this breaker guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn notify(&self, transitions: &mut Vec<(BreakerState, BreakerState)>) {
        if transitions.is_empty() {
            return;
        }
        let listeners: Vec<TransitionListener> = self
            .listeners
            .read()
            .expect("breaker listener lock poisoned")
            .clone();
        for (from, to) in transitions.drain(..) {
            debug!(breaker = %self.name, ?from, ?to, "Circuit transition");
            for listener in &listeners {
                listener(from, to);
            }
        }
    }
}
