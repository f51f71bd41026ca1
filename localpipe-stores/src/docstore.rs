//! In-memory document store.
//!
//! Stands in for a document database: `save` upserts a JSON document into a
//! named collection at a caller-specified durability level, `scan` reads a
//! collection back. The error injector can fail the next N saves, or fail
//! every save whose serialized document contains a configured substring —
//! that is how tests make the store unreachable for exactly one unit.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocStoreError>;

#[derive(Error, Debug, Clone)]
pub enum DocStoreError {
    #[error("Failed to save document: {0}")]
    Save(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
}

/// Durability level for a save, mirroring write-concern semantics: either
/// fire-and-forget or acknowledged by the store before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    Unacknowledged,
    #[default]
    Acknowledged,
}

#[derive(Debug, Default)]
struct DocStoreState {
    collections: HashMap<String, Vec<Value>>,
}

/// Error injection for the document store.
#[derive(Debug, Default)]
pub struct DocErrorInjector {
    fail_next_saves: AtomicUsize,
    /// When set, every save whose serialized document contains this
    /// substring fails.
    fail_saves_matching: RwLock<Option<String>>,
}

impl DocErrorInjector {
    /// Fail the next N save operations.
    pub fn fail_saves(&self, count: usize) {
        self.fail_next_saves.store(count, Ordering::Relaxed);
    }

    /// Fail every save whose serialized document contains `pattern`.
    /// Pass `None` to clear.
    pub fn fail_saves_matching(&self, pattern: Option<String>) {
        *self.fail_saves_matching.write() = pattern;
    }

    fn should_fail(&self, serialized: &str) -> bool {
        if let Some(pattern) = self.fail_saves_matching.read().as_deref() {
            if serialized.contains(pattern) {
                return true;
            }
        }
        self.fail_next_saves
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }
}

/// Client handle to the in-memory document store. Cheap to clone; every
/// clone shares the same collections and injector.
#[derive(Debug, Clone, Default)]
pub struct DocStore {
    state: Arc<RwLock<DocStoreState>>,
    error_injector: Arc<DocErrorInjector>,
}

impl DocStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_injector(&self) -> &Arc<DocErrorInjector> {
        &self.error_injector
    }

    /// Upsert a document into `collection` at the given durability level.
    pub fn save(&self, collection: &str, document: Value, _durability: Durability) -> Result<()> {
        let serialized = document.to_string();
        if self.error_injector.should_fail(&serialized) {
            return Err(DocStoreError::Save(format!(
                "store unreachable for document {serialized}"
            )));
        }

        self.state
            .write()
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    /// All documents in a collection, in insertion order. A collection that
    /// was never written to reads as empty.
    pub fn scan(&self, collection: &str) -> Vec<Value> {
        self.state
            .read()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.state
            .read()
            .collections
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Remove a collection and all of its documents.
    pub fn drop_collection(&self, collection: &str) -> Result<()> {
        self.state
            .write()
            .collections
            .remove(collection)
            .map(|_| ())
            .ok_or_else(|| DocStoreError::CollectionNotFound(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_save_and_scan() {
        let store = DocStore::new();
        store
            .save("units", json!({"id": 1, "msg": "a"}), Durability::Acknowledged)
            .unwrap();
        store
            .save("units", json!({"id": 2, "msg": "b"}), Durability::Acknowledged)
            .unwrap();

        assert_eq!(store.count("units"), 2);
        let docs = store.scan("units");
        assert_eq!(docs[0]["id"], 1);
        assert_eq!(docs[1]["msg"], "b");
        assert_eq!(store.count("other"), 0);
    }

    #[test]
    fn test_fail_next_saves() {
        let store = DocStore::new();
        store.error_injector().fail_saves(1);

        let result = store.save("units", json!({"id": 1}), Durability::Acknowledged);
        assert!(matches!(result, Err(DocStoreError::Save(_))));

        store
            .save("units", json!({"id": 2}), Durability::Acknowledged)
            .unwrap();
        assert_eq!(store.count("units"), 1);
    }

    #[test]
    fn test_fail_saves_matching_single_document() {
        let store = DocStore::new();
        store
            .error_injector()
            .fail_saves_matching(Some("\"id\":7".to_string()));

        for i in 1..=10 {
            let result = store.save("units", json!({"id": i}), Durability::Acknowledged);
            if i == 7 {
                assert!(result.is_err(), "document 7 should be rejected");
            } else {
                assert!(result.is_ok(), "document {i} should be saved");
            }
        }
        assert_eq!(store.count("units"), 9);

        store.error_injector().fail_saves_matching(None);
        store
            .save("units", json!({"id": 7}), Durability::Acknowledged)
            .unwrap();
        assert_eq!(store.count("units"), 10);
    }

    #[test]
    fn test_drop_collection() {
        let store = DocStore::new();
        store
            .save("units", json!({"id": 1}), Durability::Unacknowledged)
            .unwrap();
        store.drop_collection("units").unwrap();
        assert_eq!(store.count("units"), 0);

        let result = store.drop_collection("units");
        assert!(matches!(result, Err(DocStoreError::CollectionNotFound(_))));
    }
}
