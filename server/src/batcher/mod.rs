//! Answer Batcher
//!
//! Write-behind buffer between the realtime transport and the durable
//! store. Submissions accumulate in memory and are flushed as one unordered
//! batch insert either when the buffer reaches the batch size or on the
//! flush timer. Transient insert failures are retried with exponential
//! delays; a batch that exhausts its retries is parked in `failed` rather
//! than dropped, for later replay via [`AnswerBatcher::retry_failed_answers`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bson::Document;
use chrono::{DateTime, Utc};
use qz_common::Answer;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::alerts::{Alert, AlertSink};
use crate::store::{DocumentStore, StoreError};

/// Collection answers are appended to.
const ANSWERS_COLLECTION: &str = "answers";

/// Batcher tuning.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Flush when the buffer reaches this many answers.
    pub batch_size: usize,
    /// Periodic flush interval.
    pub flush_interval: Duration,
    /// Insert retries per batch after the first attempt.
    pub max_retries: u32,
    /// Base delay for the exponential retry schedule.
    pub retry_base_delay: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        }
    }
}

/// Partial configuration update.
#[derive(Debug, Default, Clone)]
pub struct BatcherConfigPatch {
    pub batch_size: Option<usize>,
    pub flush_interval: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_base_delay: Option<Duration>,
}

/// Rolling batcher statistics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatcherStats {
    pub total_answers_added: u64,
    /// Answers durably inserted.
    pub total_answers_processed: u64,
    pub successful_batches: u64,
    pub failed_batches: u64,
    pub total_retries: u64,
    pub average_batch_size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_flush_at: Option<DateTime<Utc>>,
}

/// Result of one flush or failed-answer retry.
#[derive(Debug, Clone)]
pub struct FlushOutcome {
    pub success: bool,
    pub inserted_count: usize,
    pub failed_count: usize,
}

impl FlushOutcome {
    const fn empty() -> Self {
        Self {
            success: true,
            inserted_count: 0,
            failed_count: 0,
        }
    }
}

struct BatcherInner {
    buffer: Vec<Answer>,
    failed: Vec<Answer>,
    stats: BatcherStats,
}

/// The write-behind answer batcher.
pub struct AnswerBatcher {
    store: Arc<dyn DocumentStore>,
    alerts: Arc<AlertSink>,
    config: RwLock<BatcherConfig>,
    inner: Mutex<BatcherInner>,
    is_flushing: AtomicBool,
    is_running: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Wakes the timer loop for shutdown or re-arm; the loop only observes
    /// it between flushes, so a flush in flight always completes.
    timer_wake: tokio::sync::Notify,
}

impl AnswerBatcher {
    pub fn new(store: Arc<dyn DocumentStore>, alerts: Arc<AlertSink>, config: BatcherConfig) -> Self {
        Self {
            store,
            alerts,
            config: RwLock::new(config),
            inner: Mutex::new(BatcherInner {
                buffer: Vec::new(),
                failed: Vec::new(),
                stats: BatcherStats::default(),
            }),
            is_flushing: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            timer: Mutex::new(None),
            timer_wake: tokio::sync::Notify::new(),
        }
    }

    /// Start the periodic flush timer. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.arm_timer();
        debug!("Answer batcher started");
    }

    /// Cancel the timer and flush whatever is buffered. Waits for any
    /// in-flight timer flush to finish first. Idempotent.
    pub async fn stop(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.timer.lock().expect("timer lock poisoned").take();
        if let Some(handle) = handle {
            self.timer_wake.notify_one();
            let _ = handle.await;
        }
        self.flush().await;
        debug!("Answer batcher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Buffer one answer; auto-starts the batcher and flushes immediately
    /// when the buffer reaches the batch size.
    pub async fn add_answer(self: &Arc<Self>, answer: Answer) {
        self.add_answers(vec![answer]).await;
    }

    /// Buffer several answers at once.
    pub async fn add_answers(self: &Arc<Self>, answers: Vec<Answer>) {
        if answers.is_empty() {
            return;
        }
        if !self.is_running.load(Ordering::SeqCst) {
            self.start();
        }
        let batch_size = self.config.read().expect("config lock poisoned").batch_size;
        let should_flush = {
            let mut inner = self.inner.lock().expect("batcher lock poisoned");
            inner.stats.total_answers_added += answers.len() as u64;
            inner.buffer.extend(answers);
            inner.buffer.len() >= batch_size
        };
        if should_flush {
            self.flush().await;
        }
    }

    /// Flush the buffer as one unordered batch insert.
    ///
    /// Short-circuits when a flush is already in flight or the buffer is
    /// empty. At most one flush runs at a time.
    pub async fn flush(&self) -> FlushOutcome {
        if self.is_flushing.swap(true, Ordering::SeqCst) {
            return FlushOutcome::empty();
        }

        let batch: Vec<Answer> = {
            let mut inner = self.inner.lock().expect("batcher lock poisoned");
            std::mem::take(&mut inner.buffer)
        };
        if batch.is_empty() {
            self.is_flushing.store(false, Ordering::SeqCst);
            return FlushOutcome::empty();
        }

        let outcome = self.insert_batch(&batch).await;
        {
            let mut inner = self.inner.lock().expect("batcher lock poisoned");
            inner.stats.last_flush_at = Some(Utc::now());
            if outcome.success {
                inner.stats.total_answers_processed += batch.len() as u64;
                inner.stats.successful_batches += 1;
                let batches = inner.stats.successful_batches;
                let processed = inner.stats.total_answers_processed;
                inner.stats.average_batch_size = processed as f64 / batches as f64;
            } else {
                inner.stats.failed_batches += 1;
                inner.failed.extend(batch.iter().cloned());
            }
        }
        if !outcome.success {
            error!(count = batch.len(), "Answer batch exhausted retries; parked");
            self.alerts.emit(&Alert::AnswersParked { count: batch.len() });
        }
        self.is_flushing.store(false, Ordering::SeqCst);
        outcome
    }

    /// Replay parked answers through the same insert path. On failure the
    /// batch is re-parked; answers are never dropped.
    pub async fn retry_failed_answers(&self) -> FlushOutcome {
        let parked: Vec<Answer> = {
            let mut inner = self.inner.lock().expect("batcher lock poisoned");
            std::mem::take(&mut inner.failed)
        };
        if parked.is_empty() {
            return FlushOutcome::empty();
        }

        let outcome = self.insert_batch(&parked).await;
        let mut inner = self.inner.lock().expect("batcher lock poisoned");
        if outcome.success {
            inner.stats.total_answers_processed += parked.len() as u64;
        } else {
            warn!(count = parked.len(), "Failed-answer retry did not recover; re-parked");
            inner.failed.extend(parked);
        }
        outcome
    }

    /// Drop parked answers (operator action after out-of-band recovery).
    pub fn clear_failed_answers(&self) -> usize {
        let mut inner = self.inner.lock().expect("batcher lock poisoned");
        let count = inner.failed.len();
        inner.failed.clear();
        count
    }

    pub fn get_failed_answers(&self) -> Vec<Answer> {
        self.inner.lock().expect("batcher lock poisoned").failed.clone()
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.lock().expect("batcher lock poisoned").buffer.len()
    }

    pub fn stats(&self) -> BatcherStats {
        self.inner.lock().expect("batcher lock poisoned").stats.clone()
    }

    pub fn reset_stats(&self) {
        self.inner.lock().expect("batcher lock poisoned").stats = BatcherStats::default();
    }

    /// Apply a partial config update; a changed flush interval re-arms the
    /// timer.
    pub fn update_config(self: &Arc<Self>, patch: BatcherConfigPatch) {
        let mut interval_changed = false;
        {
            let mut config = self.config.write().expect("config lock poisoned");
            if let Some(batch_size) = patch.batch_size {
                config.batch_size = batch_size;
            }
            if let Some(interval) = patch.flush_interval {
                interval_changed = interval != config.flush_interval;
                config.flush_interval = interval;
            }
            if let Some(max_retries) = patch.max_retries {
                config.max_retries = max_retries;
            }
            if let Some(base) = patch.retry_base_delay {
                config.retry_base_delay = base;
            }
        }
        if interval_changed && self.is_running.load(Ordering::SeqCst) {
            // The old loop drains the wake permit and exits at its next
            // select point; the replacement picks up the new interval.
            self.timer.lock().expect("timer lock poisoned").take();
            self.timer_wake.notify_one();
            self.arm_timer();
        }
    }

    pub fn config(&self) -> BatcherConfig {
        self.config.read().expect("config lock poisoned").clone()
    }

    fn arm_timer(self: &Arc<Self>) {
        let batcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let interval = batcher
                    .config
                    .read()
                    .expect("config lock poisoned")
                    .flush_interval;
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        if !batcher.is_running.load(Ordering::SeqCst) {
                            break;
                        }
                        batcher.flush().await;
                    }
                    () = batcher.timer_wake.notified() => break,
                }
            }
        });
        *self.timer.lock().expect("timer lock poisoned") = Some(handle);
    }

    /// One batch through the insert path: unordered insert with bounded
    /// retries on transient errors; anything else fails immediately.
    async fn insert_batch(&self, batch: &[Answer]) -> FlushOutcome {
        let (max_retries, base_delay) = {
            let config = self.config.read().expect("config lock poisoned");
            (config.max_retries, config.retry_base_delay)
        };

        let docs: Result<Vec<Document>, _> = batch.iter().map(bson::to_document).collect();
        let docs = match docs {
            Ok(docs) => docs,
            Err(e) => {
                error!(error = %e, "Answer batch could not be encoded");
                return FlushOutcome {
                    success: false,
                    inserted_count: 0,
                    failed_count: batch.len(),
                };
            }
        };

        let mut attempt: u32 = 0;
        loop {
            match self.store.insert_many(ANSWERS_COLLECTION, docs.clone()).await {
                Ok(inserted) => {
                    debug!(inserted, "Answer batch flushed");
                    return FlushOutcome {
                        success: true,
                        inserted_count: inserted as usize,
                        failed_count: 0,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_retries => {
                    let delay = base_delay.saturating_mul(1u32 << attempt.min(16));
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Answer batch insert failed; retrying"
                    );
                    {
                        let mut inner = self.inner.lock().expect("batcher lock poisoned");
                        inner.stats.total_retries += 1;
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, "Answer batch insert failed");
                    return FlushOutcome {
                        success: false,
                        inserted_count: 0,
                        failed_count: batch.len(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::MemoryDocStore;
    use qz_common::{AnswerId, ParticipantId, QuestionId, SessionId};

    fn answer(id: &str) -> Answer {
        Answer::new(
            AnswerId::new(id),
            SessionId::new("s1"),
            ParticipantId::new("p1"),
            QuestionId::new("q1"),
            vec!["a".into()],
            250,
        )
    }

    fn batcher_with(config: BatcherConfig) -> (Arc<AnswerBatcher>, Arc<MemoryDocStore>) {
        let store = Arc::new(MemoryDocStore::new());
        let batcher = Arc::new(AnswerBatcher::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::new(AlertSink::new()),
            config,
        ));
        (batcher, store)
    }

    #[tokio::test]
    async fn reaching_batch_size_flushes_once() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 5,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        });

        for i in 0..5 {
            batcher.add_answer(answer(&format!("a{i}"))).await;
        }

        assert_eq!(store.insert_many_calls(), 1);
        assert_eq!(store.dump("answers").len(), 5);
        assert_eq!(batcher.buffer_size(), 0);
        let stats = batcher.stats();
        assert_eq!(stats.total_answers_processed, 5);
        assert_eq!(stats.successful_batches, 1);
        assert!((stats.average_batch_size - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn below_batch_size_waits_for_explicit_flush() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        });

        batcher.add_answers(vec![answer("a1"), answer("a2")]).await;
        assert_eq!(store.insert_many_calls(), 0);
        assert_eq!(batcher.buffer_size(), 2);

        let outcome = batcher.flush().await;
        assert!(outcome.success);
        assert_eq!(outcome.inserted_count, 2);
        assert_eq!(batcher.buffer_size(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_parks_the_batch() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            max_retries: 0,
            ..Default::default()
        });
        store.failure_switch().store(true, Ordering::SeqCst);

        batcher.add_answer(answer("a1")).await;
        let outcome = batcher.flush().await;
        assert!(!outcome.success);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(batcher.get_failed_answers().len(), 1);
        assert_eq!(batcher.stats().failed_batches, 1);

        // Store heals; the parked batch replays cleanly.
        store.failure_switch().store(false, Ordering::SeqCst);
        let retry = batcher.retry_failed_answers().await;
        assert!(retry.success);
        assert_eq!(retry.inserted_count, 1);
        assert!(batcher.get_failed_answers().is_empty());
        assert_eq!(store.dump("answers").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
        });
        store.failure_switch().store(true, Ordering::SeqCst);

        batcher.add_answer(answer("a1")).await;
        let flush = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move { batcher.flush().await })
        };
        // Heal after the first failure; the retry succeeds.
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.failure_switch().store(false, Ordering::SeqCst);

        let outcome = flush.await.unwrap();
        assert!(outcome.success);
        assert!(batcher.stats().total_retries >= 1);
        assert_eq!(store.dump("answers").len(), 1);
    }

    #[tokio::test]
    async fn accounting_invariant_holds() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            max_retries: 0,
            ..Default::default()
        });

        batcher.add_answers((0..4).map(|i| answer(&format!("ok{i}"))).collect()).await;
        batcher.flush().await;

        store.failure_switch().store(true, Ordering::SeqCst);
        batcher.add_answers((0..3).map(|i| answer(&format!("bad{i}"))).collect()).await;
        batcher.flush().await;

        store.failure_switch().store(false, Ordering::SeqCst);
        batcher.add_answer(answer("buffered")).await;

        let stats = batcher.stats();
        let buffered = batcher.buffer_size() as u64;
        let parked = batcher.get_failed_answers().len() as u64;
        assert_eq!(
            stats.total_answers_added,
            stats.total_answers_processed + parked + buffered
        );
    }

    #[tokio::test]
    async fn stop_flushes_remaining_buffer() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        batcher.add_answer(answer("a1")).await;
        assert!(batcher.is_running());

        batcher.stop().await;
        assert!(!batcher.is_running());
        assert_eq!(store.dump("answers").len(), 1);

        // Idempotent.
        batcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_periodically() {
        let (batcher, store) = batcher_with(BatcherConfig {
            batch_size: 100,
            flush_interval: Duration::from_millis(200),
            ..Default::default()
        });
        batcher.add_answer(answer("a1")).await;
        assert_eq!(store.insert_many_calls(), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(store.dump("answers").len(), 1);
        batcher.stop().await;
    }

    #[tokio::test]
    async fn clear_failed_drops_parked_answers() {
        let (batcher, store) = batcher_with(BatcherConfig {
            max_retries: 0,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        store.failure_switch().store(true, Ordering::SeqCst);
        batcher.add_answer(answer("a1")).await;
        batcher.flush().await;
        assert_eq!(batcher.clear_failed_answers(), 1);
        assert!(batcher.get_failed_answers().is_empty());
    }
}
