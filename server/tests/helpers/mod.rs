//! Reusable test helpers for resilience integration tests.
//!
//! Builds the full substrate (cache facade, pending queue, store facade,
//! batcher, recovery worker) over deterministic in-memory drivers with
//! failure switches, so suites run without live Redis or MongoDB.

// Each suite uses its own subset of these helpers.
#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use qz_server::alerts::AlertSink;
use qz_server::batcher::{AnswerBatcher, BatcherConfig};
use qz_server::breaker::BreakerConfig;
use qz_server::cache::testutil::FlakyDriver;
use qz_server::cache::{CacheDriver, CacheFacade};
use qz_server::observability::PerfMonitor;
use qz_server::recovery::{RecoveryWorker, SessionRecoveryService, WorkerConfig};
use qz_server::store::testutil::MemoryDocStore;
use qz_server::store::{DocumentStore, PendingWriteQueue, StoreFacade};

use qz_common::{Answer, AnswerId, ParticipantId, QuestionId, SessionId};

/// A fully wired resilience substrate over in-memory fakes.
pub struct TestStack {
    pub alerts: Arc<AlertSink>,
    pub cache: Arc<CacheFacade>,
    pub cache_switch: Arc<AtomicBool>,
    pub store: Arc<MemoryDocStore>,
    pub store_switch: Arc<AtomicBool>,
    pub pending: Arc<PendingWriteQueue>,
    pub facade: Arc<StoreFacade>,
}

impl TestStack {
    pub fn new() -> Self {
        Self::with_breaker(BreakerConfig::database())
    }

    pub fn with_breaker(config: BreakerConfig) -> Self {
        let alerts = Arc::new(AlertSink::new());

        let driver = FlakyDriver::new();
        let cache_switch = driver.failure_switch();
        let cache = Arc::new(CacheFacade::new(
            Arc::new(driver) as Arc<dyn CacheDriver>,
            Arc::clone(&alerts),
            Duration::from_secs(30),
        ));

        let store = Arc::new(MemoryDocStore::new());
        let store_switch = store.failure_switch();

        let pending = Arc::new(PendingWriteQueue::new(Arc::clone(&cache)));
        let facade = Arc::new(StoreFacade::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&pending),
            Arc::clone(&alerts),
            config,
        ));

        Self {
            alerts,
            cache,
            cache_switch,
            store,
            store_switch,
            pending,
            facade,
        }
    }

    /// A batcher over this stack's store.
    pub fn batcher(&self, config: BatcherConfig) -> Arc<AnswerBatcher> {
        Arc::new(AnswerBatcher::new(
            Arc::clone(&self.store) as Arc<dyn DocumentStore>,
            Arc::clone(&self.alerts),
            config,
        ))
    }

    /// A recovery worker over this stack's store and queue.
    pub fn worker(&self, config: WorkerConfig) -> Arc<RecoveryWorker> {
        Arc::new(RecoveryWorker::new(
            Arc::clone(&self.store) as Arc<dyn DocumentStore>,
            Arc::clone(&self.pending),
            Arc::clone(&self.alerts),
            config,
        ))
    }

    /// A session-recovery service over this stack.
    pub fn session_recovery(&self) -> SessionRecoveryService {
        SessionRecoveryService::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.facade),
            Arc::new(PerfMonitor::new()),
        )
    }
}

/// A sample unscored answer.
pub fn answer(id: &str) -> Answer {
    Answer::new(
        AnswerId::new(id),
        SessionId::new("s1"),
        ParticipantId::new("p1"),
        QuestionId::new("q1"),
        vec!["a".into()],
        420,
    )
}
