//! Test Document Store
//!
//! Deterministic in-memory [`DocumentStore`] with a failure switch and call
//! counters, shared by the resilience test suites.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::collections::HashMap;

use async_trait::async_trait;
use bson::{Bson, Document};

use super::{DocumentStore, FindQuery, StoreError};

/// Fields treated as unique per collection, mirroring the index profile.
const UNIQUE_FIELDS: &[&str] = &["documentId", "answerId"];

/// In-memory document store with simple exact-match filters.
#[derive(Default)]
pub struct MemoryDocStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    failing: Arc<AtomicBool>,
    insert_many_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for toggling the outage from tests.
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }

    /// Number of `insert_many` invocations so far.
    pub fn insert_many_calls(&self) -> usize {
        self.insert_many_calls.load(Ordering::SeqCst)
    }

    /// Number of write operations (insert/update/delete) so far.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// All documents currently in `collection`.
    pub fn dump(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a document directly, bypassing the failure switch.
    pub fn seed(&self, collection: &str, document: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_owned())
            .or_default()
            .push(document);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// Exact-match subset filter: every filter field must equal the document's.
fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

fn unique_violation(existing: &[Document], doc: &Document) -> Option<String> {
    for field in UNIQUE_FIELDS {
        if let Some(value) = doc.get(field) {
            if existing.iter().any(|d| d.get(field) == Some(value)) {
                return Some(format!(
                    "E11000 duplicate key error: {field} = {value}"
                ));
            }
        }
    }
    None
}

#[async_trait]
impl DocumentStore for MemoryDocStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<Option<Document>, StoreError> {
        self.check()?;
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches(d, &filter)).cloned()))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        query: FindQuery,
    ) -> Result<Vec<Document>, StoreError> {
        self.check()?;
        let collections = self.collections.lock().unwrap();
        let mut found: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches(d, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(skip) = query.skip {
            found = found.into_iter().skip(skip as usize).collect();
        }
        if let Some(limit) = query.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        self.check()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();
        if let Some(message) = unique_violation(docs, &document) {
            return Err(StoreError::DuplicateKey(message));
        }
        let id = document
            .get("documentId")
            .or_else(|| document.get("_id"))
            .map_or_else(
                || bson::oid::ObjectId::new().to_hex(),
                |b| match b {
                    Bson::String(s) => s.clone(),
                    other => other.to_string(),
                },
            );
        docs.push(document);
        Ok(id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64, StoreError> {
        self.insert_many_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let count = documents.len() as u64;
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection.to_owned())
            .or_default()
            .extend(documents);
        Ok(count)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(u64, u64), StoreError> {
        self.check()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let set_fields = update
            .get_document("$set")
            .map_or_else(|_| update.clone(), Clone::clone);

        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();
        if let Some(target) = docs.iter_mut().find(|d| matches(d, &filter)) {
            for (k, v) in &set_fields {
                target.insert(k, v.clone());
            }
            return Ok((1, 1));
        }
        if upsert {
            let mut fresh = Document::new();
            for (k, v) in &filter {
                fresh.insert(k, v.clone());
            }
            for (k, v) in &set_fields {
                fresh.insert(k, v.clone());
            }
            docs.push(fresh);
            return Ok((0, 0));
        }
        Ok((0, 0))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> Result<u64, StoreError> {
        self.check()?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_owned()).or_default();
        if let Some(pos) = docs.iter().position(|d| matches(d, &filter)) {
            docs.remove(pos);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Document,
    ) -> Result<u64, StoreError> {
        self.check()?;
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, &filter)).count() as u64)
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
