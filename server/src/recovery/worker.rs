//! Pending-Write Recovery Worker
//!
//! Periodic background job that watches the store-unavailable marker and,
//! once the durable store answers pings again, drains the pending-write
//! queue oldest-first in bounded batches. Replayed writes use upserts where
//! possible; duplicate-key and no-match errors count as resolved, since the
//! write's effect is already present.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bson::{doc, Document};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertSink};
use crate::store::pending::{PendingOp, PendingWrite, PendingWriteQueue};
use crate::store::{DocumentStore, StoreError};

/// Retries per replayed write (transient errors only).
const APPLY_RETRIES: u32 = 3;

/// Delay between apply retries, scaled by attempt number.
const APPLY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to check the marker and probe the store.
    pub check_interval: Duration,
    /// Pending writes applied per batch.
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            batch_size: 10,
        }
    }
}

/// Partial worker configuration update.
#[derive(Debug, Default, Clone)]
pub struct WorkerConfigPatch {
    pub check_interval: Option<Duration>,
    pub batch_size: Option<usize>,
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Stopped,
    Running,
    Recovering,
}

/// Rolling worker statistics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub total_ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<DateTime<Utc>>,
    pub total_recoveries: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<String>,
}

/// The background recovery worker.
pub struct RecoveryWorker {
    store: Arc<dyn DocumentStore>,
    pending: Arc<PendingWriteQueue>,
    alerts: Arc<AlertSink>,
    config: RwLock<WorkerConfig>,
    stats: Mutex<WorkerStats>,
    status: Mutex<WorkerStatus>,
    /// Non-reentrant: a tick that arrives mid-recovery is rejected.
    recovery_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    trigger: Mutex<Option<mpsc::Sender<()>>>,
}

impl RecoveryWorker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        pending: Arc<PendingWriteQueue>,
        alerts: Arc<AlertSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            pending,
            alerts,
            config: RwLock::new(config),
            stats: Mutex::new(WorkerStats::default()),
            status: Mutex::new(WorkerStatus::Stopped),
            recovery_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
            trigger: Mutex::new(None),
        }
    }

    /// Start the periodic check loop: one immediate check, then one per
    /// interval, plus explicit triggers. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().expect("worker task lock poisoned");
        if task.is_some() {
            return;
        }
        *self.status.lock().expect("worker status lock poisoned") = WorkerStatus::Running;

        let (tx, mut rx) = mpsc::channel::<()>(4);
        *self.trigger.lock().expect("worker trigger lock poisoned") = Some(tx);

        let worker = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            worker.run_check().await;
            loop {
                let interval = worker
                    .config
                    .read()
                    .expect("worker config lock poisoned")
                    .check_interval;
                tokio::select! {
                    () = tokio::time::sleep(interval) => worker.run_check().await,
                    received = rx.recv() => match received {
                        Some(()) => worker.run_check().await,
                        None => break,
                    },
                }
            }
        }));
        info!("Recovery worker started");
    }

    /// Stop the check loop. Idempotent; a recovery in flight is aborted at
    /// the task boundary.
    pub fn stop(&self) {
        self.trigger.lock().expect("worker trigger lock poisoned").take();
        if let Some(handle) = self.task.lock().expect("worker task lock poisoned").take() {
            handle.abort();
            *self.status.lock().expect("worker status lock poisoned") = WorkerStatus::Stopped;
            info!("Recovery worker stopped");
        }
    }

    /// Run one check outside the schedule. Falls back to an inline check
    /// when the loop is not running.
    pub async fn trigger_now(self: &Arc<Self>) {
        let sender = self
            .trigger
            .lock()
            .expect("worker trigger lock poisoned")
            .clone();
        match sender {
            Some(tx) => {
                let _ = tx.try_send(());
            }
            None => self.run_check().await,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.lock().expect("worker status lock poisoned")
    }

    pub fn get_stats(&self) -> WorkerStats {
        self.stats.lock().expect("worker stats lock poisoned").clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.lock().expect("worker stats lock poisoned") = WorkerStats::default();
    }

    /// Apply a partial config update; a changed interval takes effect on
    /// the next tick.
    pub fn configure(&self, patch: WorkerConfigPatch) {
        let mut config = self.config.write().expect("worker config lock poisoned");
        if let Some(interval) = patch.check_interval {
            config.check_interval = interval;
        }
        if let Some(batch_size) = patch.batch_size {
            config.batch_size = batch_size.max(1);
        }
    }

    /// One tick: read the marker, probe the store, drain if possible.
    pub async fn run_check(self: &Arc<Self>) {
        {
            let mut stats = self.stats.lock().expect("worker stats lock poisoned");
            stats.total_ticks += 1;
            stats.last_tick_at = Some(Utc::now());
        }

        let unavailable = match self.pending.is_unavailable().await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(error = %e, "Could not read store-unavailable marker");
                return;
            }
        };
        if !unavailable {
            return;
        }

        let pending_count = match self.pending.count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Could not read pending-write count");
                return;
            }
        };
        if pending_count == 0 {
            debug!("Marker set with nothing pending; clearing");
            if let Err(e) = self.pending.clear_unavailable().await {
                warn!(error = %e, "Could not clear store-unavailable marker");
            }
            return;
        }

        if self.store.ping().await.is_err() {
            debug!(pending = pending_count, "Store still down; recovery deferred");
            return;
        }

        // Reject concurrent recoveries outright rather than queueing them.
        let Ok(_guard) = self.recovery_lock.try_lock() else {
            warn!("Recovery already in progress; tick skipped");
            return;
        };
        self.recover(pending_count as usize).await;
    }

    /// Drain the queue oldest-first in batches. Holds the recovery lock.
    async fn recover(self: &Arc<Self>, pending_count: usize) {
        *self.status.lock().expect("worker status lock poisoned") = WorkerStatus::Recovering;
        {
            let mut stats = self.stats.lock().expect("worker stats lock poisoned");
            stats.total_recoveries += 1;
        }
        info!(pending = pending_count, "Starting pending-write recovery");
        self.alerts.emit(&Alert::RecoveryStarted {
            pending: pending_count,
        });

        let outcome = self.drain().await;

        {
            let mut stats = self.stats.lock().expect("worker stats lock poisoned");
            stats.total_processed += outcome.processed as u64;
            stats.total_failed += outcome.failed as u64;
            stats.last_result = Some(outcome.summary());
        }
        match &outcome.aborted {
            Some(reason) => {
                warn!(
                    processed = outcome.processed,
                    failed = outcome.failed,
                    reason = %reason,
                    "Recovery aborted"
                );
                self.alerts.emit(&Alert::RecoveryAborted {
                    error: reason.clone(),
                });
            }
            None => {
                info!(
                    processed = outcome.processed,
                    failed = outcome.failed,
                    "Recovery completed"
                );
                self.alerts.emit(&Alert::RecoveryCompleted {
                    processed: outcome.processed,
                    failed: outcome.failed,
                });
            }
        }

        *self.status.lock().expect("worker status lock poisoned") = WorkerStatus::Running;
    }

    async fn drain(&self) -> DrainOutcome {
        let batch_size = self
            .config
            .read()
            .expect("worker config lock poisoned")
            .batch_size;

        let mut queue = match self.pending.list().await {
            Ok(list) => list,
            Err(e) => {
                return DrainOutcome::aborted(format!("pending list unreadable: {e}"));
            }
        };
        // The list is newest-first; recovery replays oldest-first.
        queue.reverse();

        let mut outcome = DrainOutcome::default();
        for batch in queue.chunks(batch_size) {
            let mut batch_failed = 0usize;
            for write in batch {
                match self.apply_write(write).await {
                    Ok(()) => {
                        outcome.processed += 1;
                        if let Err(e) = self
                            .pending
                            .delete_snapshot(&write.collection, &write.document_id)
                            .await
                        {
                            warn!(error = %e, "Could not delete fallback snapshot");
                        }
                    }
                    Err(e) => {
                        warn!(
                            collection = %write.collection,
                            document_id = %write.document_id,
                            error = %e,
                            "Pending write replay failed"
                        );
                        outcome.failed += 1;
                        batch_failed += 1;
                    }
                }
            }

            // Durable-forward: remove the batch only after it was applied. A
            // crash in between replays the batch; upserts make that
            // idempotent for updates, and duplicate-key replays resolve.
            if let Err(e) = self.pending.remove_oldest(batch.len()).await {
                outcome.aborted = Some(format!("queue trim failed: {e}"));
                return outcome;
            }

            if batch_failed > 0 && self.store.ping().await.is_err() {
                outcome.aborted = Some("store became unavailable mid-recovery".to_owned());
                return outcome;
            }
        }

        if outcome.failed == 0 {
            if let Err(e) = self.pending.clear_unavailable().await {
                warn!(error = %e, "Could not clear store-unavailable marker");
            }
            if let Err(e) = self.pending.clear().await {
                warn!(error = %e, "Could not clear pending list");
            }
        }
        outcome
    }

    /// Replay one pending write with bounded retries for transient errors.
    /// Duplicate-key and no-match outcomes count as resolved.
    async fn apply_write(&self, write: &PendingWrite) -> Result<(), StoreError> {
        let mut attempt: u32 = 1;
        loop {
            let result = self.apply_once(write).await;
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_duplicate_key() => {
                    debug!(
                        document_id = %write.document_id,
                        "Replay hit an existing document; treating as resolved"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < APPLY_RETRIES => {
                    tokio::time::sleep(APPLY_RETRY_DELAY.saturating_mul(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_once(&self, write: &PendingWrite) -> Result<(), StoreError> {
        match write.op {
            PendingOp::Insert => {
                let mut document = value_to_document(write.document.as_ref())?;
                if !document.contains_key("documentId") {
                    document.insert("documentId", write.document_id.clone());
                }
                self.store
                    .insert_one(&write.collection, document)
                    .await
                    .map(|_| ())
            }
            PendingOp::Update => {
                let update = value_to_document(write.update.as_ref())?;
                self.store
                    .update_one(
                        &write.collection,
                        doc! { "documentId": &write.document_id },
                        doc! { "$set": update },
                        true,
                    )
                    .await
                    .map(|_| ())
            }
            PendingOp::Delete => {
                let filter = match &write.filter {
                    Some(value) => value_to_document(Some(value))?,
                    None => doc! { "documentId": &write.document_id },
                };
                // A no-match delete means the document is already gone.
                self.store
                    .delete_one(&write.collection, filter)
                    .await
                    .map(|_| ())
            }
        }
    }
}

#[derive(Debug, Default)]
struct DrainOutcome {
    processed: usize,
    failed: usize,
    aborted: Option<String>,
}

impl DrainOutcome {
    fn aborted(reason: String) -> Self {
        Self {
            processed: 0,
            failed: 0,
            aborted: Some(reason),
        }
    }

    fn summary(&self) -> String {
        match &self.aborted {
            Some(reason) => format!(
                "aborted after {} applied, {} failed: {reason}",
                self.processed, self.failed
            ),
            None => format!("{} applied, {} failed", self.processed, self.failed),
        }
    }
}

fn value_to_document(value: Option<&Value>) -> Result<Document, StoreError> {
    let value = value.ok_or_else(|| {
        StoreError::Serialization("pending write is missing its payload".into())
    })?;
    bson::to_document(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertSink;
    use crate::cache::testutil::FlakyDriver;
    use crate::cache::CacheFacade;
    use crate::store::testutil::MemoryDocStore;
    use serde_json::json;
    use std::sync::atomic::Ordering as AtomicOrdering;

    struct Fixture {
        worker: Arc<RecoveryWorker>,
        store: Arc<MemoryDocStore>,
        pending: Arc<PendingWriteQueue>,
    }

    fn fixture(batch_size: usize) -> Fixture {
        let cache = Arc::new(CacheFacade::new(
            Arc::new(FlakyDriver::new()),
            Arc::new(AlertSink::new()),
            Duration::from_secs(30),
        ));
        let pending = Arc::new(PendingWriteQueue::new(cache));
        let store = Arc::new(MemoryDocStore::new());
        let worker = Arc::new(RecoveryWorker::new(
            Arc::clone(&store) as Arc<dyn DocumentStore>,
            Arc::clone(&pending),
            Arc::new(AlertSink::new()),
            WorkerConfig {
                check_interval: Duration::from_secs(3600),
                batch_size,
            },
        ));
        Fixture {
            worker,
            store,
            pending,
        }
    }

    #[tokio::test]
    async fn tick_without_marker_does_nothing() {
        let f = fixture(10);
        f.worker.run_check().await;
        assert_eq!(f.worker.get_stats().total_ticks, 1);
        assert_eq!(f.worker.get_stats().total_recoveries, 0);
    }

    #[tokio::test]
    async fn marker_with_empty_queue_is_cleared() {
        let f = fixture(10);
        f.pending.set_unavailable().await.unwrap();
        f.worker.run_check().await;
        assert!(!f.pending.is_unavailable().await.unwrap());
        assert_eq!(f.worker.get_stats().total_recoveries, 0);
    }

    #[tokio::test]
    async fn store_still_down_defers_recovery() {
        let f = fixture(10);
        f.pending.set_unavailable().await.unwrap();
        f.pending
            .enqueue(&PendingWrite::insert("test", "d1", json!({"documentId": "d1"})))
            .await
            .unwrap();
        f.store.failure_switch().store(true, AtomicOrdering::SeqCst);

        f.worker.run_check().await;
        assert_eq!(f.pending.count().await.unwrap(), 1);
        assert!(f.pending.is_unavailable().await.unwrap());
        assert_eq!(f.worker.get_stats().total_recoveries, 0);
    }

    #[tokio::test]
    async fn drains_queue_oldest_first_and_clears_marker() {
        let f = fixture(10);
        f.pending.set_unavailable().await.unwrap();
        for i in 1..=3 {
            f.pending
                .enqueue(&PendingWrite::insert(
                    "test",
                    &format!("d{i}"),
                    json!({"documentId": format!("d{i}"), "seq": i}),
                ))
                .await
                .unwrap();
            f.pending
                .write_snapshot("test", &format!("d{i}"), &json!({"documentId": format!("d{i}")}))
                .await
                .unwrap();
        }

        f.worker.run_check().await;

        // Applied in enqueue order.
        let docs = f.store.dump("test");
        let ids: Vec<&str> = docs.iter().map(|d| d.get_str("documentId").unwrap()).collect();
        assert_eq!(ids, vec!["d1", "d2", "d3"]);

        assert_eq!(f.pending.count().await.unwrap(), 0);
        assert!(!f.pending.is_unavailable().await.unwrap());
        // Snapshots were consumed.
        assert!(f.pending.read_snapshot("test", "d1").await.unwrap().is_none());

        let stats = f.worker.get_stats();
        assert_eq!(stats.total_recoveries, 1);
        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(f.worker.status(), WorkerStatus::Running);
    }

    #[tokio::test]
    async fn update_replay_upserts_by_document_id() {
        let f = fixture(10);
        f.pending.set_unavailable().await.unwrap();
        f.pending
            .enqueue(&PendingWrite::update(
                "sessions",
                "s1",
                json!({"documentId": "s1"}),
                json!({"phase": "ended"}),
            ))
            .await
            .unwrap();

        f.worker.run_check().await;

        let docs = f.store.dump("sessions");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_str("documentId").unwrap(), "s1");
        assert_eq!(docs[0].get_str("phase").unwrap(), "ended");
    }

    #[tokio::test]
    async fn duplicate_key_replay_counts_as_resolved() {
        let f = fixture(10);
        f.store.seed("test", doc! { "documentId": "d1", "seq": 0 });
        f.pending.set_unavailable().await.unwrap();
        f.pending
            .enqueue(&PendingWrite::insert("test", "d1", json!({"documentId": "d1", "seq": 1})))
            .await
            .unwrap();

        f.worker.run_check().await;

        let stats = f.worker.get_stats();
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.total_failed, 0);
        assert_eq!(f.pending.count().await.unwrap(), 0);
        assert!(!f.pending.is_unavailable().await.unwrap());
    }

    #[tokio::test]
    async fn delete_replay_uses_filter() {
        let f = fixture(10);
        f.store.seed("test", doc! { "documentId": "d1" });
        f.pending.set_unavailable().await.unwrap();
        f.pending
            .enqueue(&PendingWrite::delete("test", "d1", json!({"documentId": "d1"})))
            .await
            .unwrap();

        f.worker.run_check().await;
        assert!(f.store.dump("test").is_empty());
        assert_eq!(f.worker.get_stats().total_processed, 1);
    }

    #[tokio::test]
    async fn stats_and_status_track_lifecycle() {
        let f = fixture(10);
        assert_eq!(f.worker.status(), WorkerStatus::Stopped);
        f.worker.start();
        // One immediate check runs on start.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.worker.status(), WorkerStatus::Running);
        assert!(f.worker.get_stats().total_ticks >= 1);

        f.worker.stop();
        assert_eq!(f.worker.status(), WorkerStatus::Stopped);
        f.worker.stop();

        f.worker.reset_stats();
        assert_eq!(f.worker.get_stats().total_ticks, 0);
    }
}
