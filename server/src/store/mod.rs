//! Durable Store Layer
//!
//! `MongoDB` connection bootstrap, the [`DocumentStore`] trait the rest of
//! the backend consumes, index management, and the resilience pieces layered
//! on top: the circuit-breaker facade and the pending-write queue.

pub mod facade;
pub mod pending;
pub mod retry;
#[doc(hidden)]
pub mod testutil;

pub use facade::{DeleteOutcome, InsertOutcome, StoreFacade, UpdateOutcome};
pub use pending::{PendingOp, PendingWrite, PendingWriteQueue};
pub use retry::retry_with_backoff;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::sanitize;

/// Errors surfaced by durable-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable (network-class failure).
    #[error("store unreachable: {0}")]
    Unavailable(String),
    /// The operation exceeded its deadline.
    #[error("store operation timed out: {0}")]
    Timeout(String),
    /// A unique index rejected the write.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// The filter had no id field a fallback write could be keyed on.
    #[error("no extractable document id in filter")]
    MissingId,
    /// The store answered but the operation failed.
    #[error("store operation failed: {0}")]
    Query(String),
    /// A document could not be encoded or decoded.
    #[error("document could not be encoded: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Network-class errors worth retrying.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey(_))
    }
}

/// Sort/skip/limit options for bulk reads.
#[derive(Debug, Default, Clone)]
pub struct FindQuery {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
}

/// The document-store operations the backend consumes.
///
/// Production uses [`MongoStore`]; tests inject deterministic fakes with
/// failure switches.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        query: FindQuery,
    ) -> Result<Vec<Document>, StoreError>;

    /// Returns the inserted id rendered as a string.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<String, StoreError>;

    /// Unordered batch insert; one bad document does not halt the batch.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, StoreError>;

    /// Returns `(matched_count, modified_count)`.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(u64, u64), StoreError>;

    /// Returns the deleted count.
    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, StoreError>;

    async fn count_documents(&self, collection: &str, filter: Document)
        -> Result<u64, StoreError>;

    /// Light health check (`admin ping`).
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Production store backed by `MongoDB`.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect with the backend's pool profile: min 10 / max 50 connections,
    /// 30 s idle close, 5 s connect timeout, retryable reads and writes.
    pub async fn connect(uri: &str) -> Result<Self, StoreError> {
        let mut options = ClientOptions::parse(uri).await.map_err(classify)?;
        options.min_pool_size = Some(10);
        options.max_pool_size = Some(50);
        options.max_idle_time = Some(Duration::from_secs(30));
        options.connect_timeout = Some(Duration::from_secs(5));
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.retry_reads = Some(true);
        options.retry_writes = Some(true);

        let client = Client::with_options(options).map_err(classify)?;
        let db = client
            .default_database()
            .unwrap_or_else(|| client.database("quizdeck"));

        // Fail fast if the deployment is unreachable.
        db.run_command(doc! { "ping": 1 }).await.map_err(classify)?;
        info!(database = %db.name(), "Connected to MongoDB");

        Ok(Self { db })
    }

    /// Wrap an existing database handle (tests, shared clients).
    pub const fn from_database(db: Database) -> Self {
        Self { db }
    }

    /// Create the indexes the quiz collections rely on. Idempotent.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = |keys: Document| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        let plain = |keys: Document| IndexModel::builder().keys(keys).build();

        let sessions = self.db.collection::<Document>("sessions");
        sessions
            .create_index(unique(doc! { "joinCode": 1 }))
            .await
            .map_err(classify)?;
        sessions
            .create_index(unique(doc! { "sessionId": 1 }))
            .await
            .map_err(classify)?;

        let participants = self.db.collection::<Document>("participants");
        participants
            .create_index(unique(doc! { "participantId": 1 }))
            .await
            .map_err(classify)?;
        participants
            .create_index(plain(doc! { "sessionId": 1, "isActive": 1 }))
            .await
            .map_err(classify)?;
        participants
            .create_index(plain(doc! { "sessionId": 1, "totalScore": -1 }))
            .await
            .map_err(classify)?;

        let answers = self.db.collection::<Document>("answers");
        answers
            .create_index(unique(doc! { "answerId": 1 }))
            .await
            .map_err(classify)?;
        answers
            .create_index(plain(doc! { "sessionId": 1, "questionId": 1 }))
            .await
            .map_err(classify)?;
        answers
            .create_index(plain(doc! { "participantId": 1, "questionId": 1 }))
            .await
            .map_err(classify)?;

        self.db
            .collection::<Document>("auditLogs")
            .create_index(plain(doc! { "timestamp": 1 }))
            .await
            .map_err(classify)?;

        info!("Ensured MongoDB indexes");
        Ok(())
    }
}

/// Map a driver error into [`StoreError`] by kind and message.
fn classify(e: mongodb::error::Error) -> StoreError {
    use mongodb::error::ErrorKind;

    let message = e.to_string();
    if message.contains("E11000") || message.to_lowercase().contains("duplicate key") {
        return StoreError::DuplicateKey(message);
    }
    match e.kind.as_ref() {
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
            StoreError::Unavailable(message)
        }
        ErrorKind::InvalidArgument { .. } | ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            StoreError::Serialization(message)
        }
        _ if sanitize::is_unavailability(&message) => StoreError::Unavailable(message),
        _ => StoreError::Query(message),
    }
}

/// Render an inserted id as the string form used across the backend.
fn render_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        self.db
            .collection::<Document>(collection)
            .find_one(filter)
            .await
            .map_err(classify)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        query: FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        let coll = self.db.collection::<Document>(collection);
        let mut find = coll.find(filter);
        if let Some(sort) = query.sort {
            find = find.sort(sort);
        }
        if let Some(skip) = query.skip {
            find = find.skip(skip);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit);
        }
        let cursor = find.await.map_err(classify)?;
        cursor.try_collect().await.map_err(classify)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        let result = self
            .db
            .collection::<Document>(collection)
            .insert_one(document)
            .await
            .map_err(classify)?;
        Ok(render_id(&result.inserted_id))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, StoreError> {
        let count = documents.len() as u64;
        self.db
            .collection::<Document>(collection)
            .insert_many(documents)
            .ordered(false)
            .await
            .map_err(classify)?;
        Ok(count)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(u64, u64), StoreError> {
        let result = self
            .db
            .collection::<Document>(collection)
            .update_one(filter, update)
            .upsert(upsert)
            .await
            .map_err(classify)?;
        Ok((result.matched_count, result.modified_count))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        let result = self
            .db
            .collection::<Document>(collection)
            .delete_one(filter)
            .await
            .map_err(classify)?;
        Ok(result.deleted_count)
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<u64, StoreError> {
        self.db
            .collection::<Document>(collection)
            .count_documents(filter)
            .await
            .map_err(classify)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
