//! Durable Store Facade
//!
//! Circuit-breaker-wrapped CRUD over the [`DocumentStore`]. While the
//! breaker admits, operations pass straight through. Once it opens, writes
//! become pending-queue intents with cache snapshots, reads come from the
//! snapshots, and the server-wide unavailable marker is raised so the
//! recovery worker knows there is work waiting.

use std::sync::Arc;

use bson::{Bson, Document};
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::alerts::{Alert, AlertSink};
use crate::breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};

use super::pending::{PendingWrite, PendingWriteQueue};
use super::{DocumentStore, FindQuery, StoreError};

/// Filter fields tried, in order, when a fallback write needs a logical id.
const ID_FIELDS: &[&str] = &[
    "_id",
    "documentId",
    "id",
    "sessionId",
    "participantId",
    "quizId",
];

/// Result of an insert, noting whether it was deferred.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub inserted_id: String,
    pub used_fallback: bool,
}

/// Result of an update. Deferred updates report zero counts.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub used_fallback: bool,
}

/// Result of a delete. Deferred deletes report a zero count.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
    pub used_fallback: bool,
}

/// The breaker-wrapped durable-store facade.
pub struct StoreFacade {
    store: Arc<dyn DocumentStore>,
    breaker: Arc<CircuitBreaker>,
    pending: Arc<PendingWriteQueue>,
}

impl StoreFacade {
    /// Build the facade and wire breaker transitions to the unavailable
    /// marker and alert sink.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        pending: Arc<PendingWriteQueue>,
        alerts: Arc<AlertSink>,
        config: BreakerConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new("mongodb", config));

        // Listeners are synchronous; marker writes are async. Bridge with a
        // channel drained by a background task.
        let (tx, mut rx) = mpsc::unbounded_channel::<(BreakerState, BreakerState)>();
        breaker.on_transition(move |from, to| {
            let _ = tx.send((from, to));
        });

        let marker_pending = Arc::clone(&pending);
        let marker_alerts = Arc::clone(&alerts);
        tokio::spawn(async move {
            while let Some((from, to)) = rx.recv().await {
                match to {
                    BreakerState::Open => {
                        if let Err(e) = marker_pending.set_unavailable().await {
                            error!(error = %e, "Failed to raise store-unavailable marker");
                        }
                        if from == BreakerState::Closed {
                            warn!("Durable store circuit opened");
                            marker_alerts.emit(&Alert::StoreUnavailable);
                        }
                    }
                    BreakerState::HalfOpen | BreakerState::Closed => {
                        if let Err(e) = marker_pending.clear_unavailable().await {
                            error!(error = %e, "Failed to clear store-unavailable marker");
                        }
                        if to == BreakerState::Closed && from != BreakerState::Closed {
                            info!("Durable store circuit closed");
                            marker_alerts.emit(&Alert::StoreRecovered);
                        }
                    }
                }
            }
        });

        Self {
            store,
            breaker,
            pending,
        }
    }

    /// The raw breaker, for status endpoints and manual reset.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The pending-write queue this facade defers into.
    pub fn pending(&self) -> &Arc<PendingWriteQueue> {
        &self.pending
    }

    /// The unwrapped store, for callers that manage their own retries.
    pub fn raw(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Read one document; on open circuit, serve the latest fallback
    /// snapshot when the filter carries an id.
    pub async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        match self
            .breaker
            .execute(|| self.store.find_one(collection, filter.clone()))
            .await
        {
            Ok(found) => Ok(found),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(BreakerError::Open { .. }) => {
                let Some(id) = extract_document_id(&filter) else {
                    return Ok(None);
                };
                match self.pending.read_snapshot(collection, &id).await {
                    Ok(Some(value)) => Ok(Some(value_to_document(&value)?)),
                    Ok(None) => Ok(None),
                    Err(e) => {
                        warn!(collection, id, error = %e, "Snapshot read failed during outage");
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Bulk read; there is no bulk fallback, so an open circuit yields an
    /// empty list.
    pub async fn find(
        &self,
        collection: &str,
        filter: Document,
        query: FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        match self
            .breaker
            .execute(|| self.store.find(collection, filter.clone(), query.clone()))
            .await
        {
            Ok(found) => Ok(found),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(BreakerError::Open { .. }) => Ok(Vec::new()),
        }
    }

    /// Insert one document; on open circuit, snapshot it and queue the
    /// insert under a caller-supplied or synthesised id.
    pub async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<InsertOutcome, StoreError> {
        match self
            .breaker
            .execute(|| self.store.insert_one(collection, document.clone()))
            .await
        {
            Ok(inserted_id) => Ok(InsertOutcome {
                inserted_id,
                used_fallback: false,
            }),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(BreakerError::Open { .. }) => {
                let id = extract_document_id(&document).unwrap_or_else(synthesize_fallback_id);

                let mut value = document_to_value(&document)?;
                if let Value::Object(map) = &mut value {
                    map.entry("documentId".to_owned())
                        .or_insert_with(|| Value::String(id.clone()));
                }

                self.pending
                    .write_snapshot(collection, &id, &value)
                    .await
                    .map_err(cache_err)?;
                self.pending
                    .enqueue(&PendingWrite::insert(collection, &id, value))
                    .await
                    .map_err(cache_err)?;

                Ok(InsertOutcome {
                    inserted_id: id,
                    used_fallback: true,
                })
            }
        }
    }

    /// Update one document; on open circuit the filter must carry an id so
    /// the intent can be queued and the snapshot patched.
    pub async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<UpdateOutcome, StoreError> {
        match self
            .breaker
            .execute(|| {
                self.store
                    .update_one(collection, filter.clone(), update.clone(), upsert)
            })
            .await
        {
            Ok((matched_count, modified_count)) => Ok(UpdateOutcome {
                matched_count,
                modified_count,
                used_fallback: false,
            }),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(BreakerError::Open { .. }) => {
                let id = extract_document_id(&filter).ok_or(StoreError::MissingId)?;

                // `$set` body when present, otherwise the whole update.
                let set_fields = update
                    .get_document("$set")
                    .map_or_else(|_| update.clone(), Clone::clone);
                let set_value = document_to_value(&set_fields)?;

                // Patch the snapshot so outage reads see the latest intent.
                let mut base = match self.pending.read_snapshot(collection, &id).await {
                    Ok(Some(Value::Object(map))) => map,
                    _ => Map::new(),
                };
                base.entry("documentId".to_owned())
                    .or_insert_with(|| Value::String(id.clone()));
                if let Value::Object(fields) = &set_value {
                    for (k, v) in fields {
                        base.insert(k.clone(), v.clone());
                    }
                }
                self.pending
                    .write_snapshot(collection, &id, &Value::Object(base))
                    .await
                    .map_err(cache_err)?;

                self.pending
                    .enqueue(&PendingWrite::update(
                        collection,
                        &id,
                        document_to_value(&filter)?,
                        set_value,
                    ))
                    .await
                    .map_err(cache_err)?;

                Ok(UpdateOutcome {
                    matched_count: 0,
                    modified_count: 0,
                    used_fallback: true,
                })
            }
        }
    }

    /// Delete one document; on open circuit the filter must carry an id.
    pub async fn delete_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteOutcome, StoreError> {
        match self
            .breaker
            .execute(|| self.store.delete_one(collection, filter.clone()))
            .await
        {
            Ok(deleted_count) => Ok(DeleteOutcome {
                deleted_count,
                used_fallback: false,
            }),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(BreakerError::Open { .. }) => {
                let id = extract_document_id(&filter).ok_or(StoreError::MissingId)?;

                self.pending
                    .enqueue(&PendingWrite::delete(
                        collection,
                        &id,
                        document_to_value(&filter)?,
                    ))
                    .await
                    .map_err(cache_err)?;
                // The snapshot no longer reflects intent; drop it.
                self.pending
                    .delete_snapshot(collection, &id)
                    .await
                    .map_err(cache_err)?;

                Ok(DeleteOutcome {
                    deleted_count: 0,
                    used_fallback: true,
                })
            }
        }
    }

    /// Count documents; an open circuit reports zero.
    pub async fn count_documents(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<u64, StoreError> {
        match self
            .breaker
            .execute(|| self.store.count_documents(collection, filter.clone()))
            .await
        {
            Ok(count) => Ok(count),
            Err(BreakerError::Inner(e)) => Err(e),
            Err(BreakerError::Open { .. }) => Ok(0),
        }
    }
}

/// First string-valued id field found in a filter or document.
pub fn extract_document_id(doc: &Document) -> Option<String> {
    for field in ID_FIELDS {
        match doc.get(field) {
            Some(Bson::String(s)) => return Some(s.clone()),
            Some(Bson::ObjectId(oid)) => return Some(oid.to_hex()),
            _ => {}
        }
    }
    None
}

/// Synthetic id for fallback inserts that arrived without one.
fn synthesize_fallback_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("fallback_{}_{}", Utc::now().timestamp_millis(), suffix)
}

fn document_to_value(doc: &Document) -> Result<Value, StoreError> {
    serde_json::to_value(doc).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn value_to_document(value: &Value) -> Result<Document, StoreError> {
    bson::to_document(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn cache_err(e: crate::cache::CacheError) -> StoreError {
    StoreError::Query(format!("fallback queue: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn id_extraction_tries_fields_in_order() {
        assert_eq!(
            extract_document_id(&doc! { "documentId": "d1", "sessionId": "s1" }),
            Some("d1".to_owned())
        );
        assert_eq!(
            extract_document_id(&doc! { "sessionId": "s1" }),
            Some("s1".to_owned())
        );
        assert_eq!(extract_document_id(&doc! { "nickname": "x" }), None);

        let oid = bson::oid::ObjectId::new();
        assert_eq!(
            extract_document_id(&doc! { "_id": oid }),
            Some(oid.to_hex())
        );
    }

    #[test]
    fn synthetic_ids_carry_the_fallback_prefix() {
        let id = synthesize_fallback_id();
        assert!(id.starts_with("fallback_"));
        let other = synthesize_fallback_id();
        assert_ne!(id, other);
    }

    #[test]
    fn document_value_round_trip() {
        let doc = doc! { "documentId": "d1", "score": 42_i64, "nested": { "flag": true } };
        let value = document_to_value(&doc).unwrap();
        let back = value_to_document(&value).unwrap();
        assert_eq!(back.get_str("documentId").unwrap(), "d1");
        assert_eq!(back.get_i64("score").unwrap(), 42);
    }
}
