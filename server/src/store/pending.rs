//! Pending Write Queue
//!
//! Write intents accepted while the durable store is down. The queue lives
//! in the cache (list key, newest-first) so it survives process restarts as
//! long as the cache does; when the cache is also down it degrades to the
//! facade's in-memory fallback, which is the catastrophic-but-still-serving
//! case. Per-document snapshots let reads during the outage observe the
//! latest accepted intent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::cache::{keys, CacheError, CacheFacade};

/// Kind of deferred mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Insert,
    Update,
    Delete,
}

/// Envelope around one deferred durable-store write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub op: PendingOp,
    pub collection: String,
    /// Logical document id (`documentId`) the write is keyed on.
    pub document_id: String,
    /// Full document for inserts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    /// Original filter for deletes (and diagnostics on updates).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    /// Field assignments for updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingWrite {
    pub fn insert(collection: &str, document_id: &str, document: Value) -> Self {
        Self {
            op: PendingOp::Insert,
            collection: collection.to_owned(),
            document_id: document_id.to_owned(),
            document: Some(document),
            filter: None,
            update: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn update(collection: &str, document_id: &str, filter: Value, update: Value) -> Self {
        Self {
            op: PendingOp::Update,
            collection: collection.to_owned(),
            document_id: document_id.to_owned(),
            document: None,
            filter: Some(filter),
            update: Some(update),
            enqueued_at: Utc::now(),
        }
    }

    pub fn delete(collection: &str, document_id: &str, filter: Value) -> Self {
        Self {
            op: PendingOp::Delete,
            collection: collection.to_owned(),
            document_id: document_id.to_owned(),
            document: None,
            filter: Some(filter),
            update: None,
            enqueued_at: Utc::now(),
        }
    }
}

/// FIFO of deferred writes plus the server-wide unavailable marker and the
/// per-document snapshot keyspace.
pub struct PendingWriteQueue {
    cache: Arc<CacheFacade>,
}

impl PendingWriteQueue {
    pub const fn new(cache: Arc<CacheFacade>) -> Self {
        Self { cache }
    }

    /// Accept a deferred write (prepended: the list is newest-first).
    pub async fn enqueue(&self, write: &PendingWrite) -> Result<(), CacheError> {
        let json = serde_json::to_string(write)?;
        self.cache
            .list_push("pending_enqueue", &keys::pending_writes(), &json, None)
            .await?;
        Ok(())
    }

    /// Snapshot of every pending write, newest first.
    pub async fn list(&self) -> Result<Vec<PendingWrite>, CacheError> {
        let raw = self
            .cache
            .list_range("pending_list", &keys::pending_writes(), 0, -1)
            .await?;
        Ok(raw
            .into_iter()
            .filter_map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| warn!(error = %e, "Skipping undecodable pending write"))
                    .ok()
            })
            .collect())
    }

    pub async fn count(&self) -> Result<i64, CacheError> {
        self.cache
            .list_len("pending_count", &keys::pending_writes())
            .await
    }

    /// Pop `n` writes from the tail, the oldest entries of the
    /// newest-first list.
    pub async fn remove_oldest(&self, n: usize) -> Result<usize, CacheError> {
        let mut removed = 0;
        for _ in 0..n {
            if self
                .cache
                .list_pop_tail("pending_remove_oldest", &keys::pending_writes())
                .await?
                .is_none()
            {
                break;
            }
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.cache
            .kv_del("pending_clear", &keys::pending_writes())
            .await
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Record the latest intent for a document so outage reads can see it.
    pub async fn write_snapshot(
        &self,
        collection: &str,
        document_id: &str,
        document: &Value,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_string(document)?;
        self.cache
            .kv_set(
                "fallback_snapshot_write",
                &keys::fallback_snapshot(collection, document_id),
                &json,
                Some(keys::FALLBACK_SNAPSHOT_TTL),
            )
            .await
    }

    /// Latest snapshotted intent for a document, if any.
    pub async fn read_snapshot(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<Value>, CacheError> {
        let raw = self
            .cache
            .kv_get(
                "fallback_snapshot_read",
                &keys::fallback_snapshot(collection, document_id),
            )
            .await?;
        raw.map(|json| serde_json::from_str(&json).map_err(CacheError::from))
            .transpose()
    }

    pub async fn delete_snapshot(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<(), CacheError> {
        self.cache
            .kv_del(
                "fallback_snapshot_delete",
                &keys::fallback_snapshot(collection, document_id),
            )
            .await
    }

    // ------------------------------------------------------------------
    // Server-wide unavailable marker
    // ------------------------------------------------------------------

    /// Raise the store-unavailable marker. Auto-expires so a crashed
    /// recovery path cannot wedge the flag forever.
    pub async fn set_unavailable(&self) -> Result<(), CacheError> {
        self.cache
            .kv_set(
                "store_unavailable_set",
                &keys::store_unavailable(),
                &Utc::now().to_rfc3339(),
                Some(keys::STORE_UNAVAILABLE_TTL),
            )
            .await
    }

    pub async fn clear_unavailable(&self) -> Result<(), CacheError> {
        self.cache
            .kv_del("store_unavailable_clear", &keys::store_unavailable())
            .await
    }

    pub async fn is_unavailable(&self) -> Result<bool, CacheError> {
        self.cache
            .kv_exists("store_unavailable_get", &keys::store_unavailable())
            .await
    }

    /// When the marker was raised, if it is currently set.
    pub async fn unavailable_since(&self) -> Result<Option<DateTime<Utc>>, CacheError> {
        let raw = self
            .cache
            .kv_get("store_unavailable_get", &keys::store_unavailable())
            .await?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}
