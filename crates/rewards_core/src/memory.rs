//! crates/rewards_core/src/memory.rs
//!
//! An in-process implementation of the `DocumentStore` port.
//! Used by the test suites and by the API when no database is configured.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::ports::{
    DocumentKey, DocumentStore, Fields, Filter, PortError, PortResult, Precondition,
    StoredDocument, Write,
};

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: Mutex<HashMap<DocumentKey, StoredDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a document directly. Handy for provisioning fixtures.
    ///
    /// Non-object values are stored as an empty document.
    pub fn insert(&self, collection: &str, id: &str, value: Value) {
        let fields = match value {
            Value::Object(fields) => fields,
            _ => Fields::new(),
        };
        let mut docs = self.lock();
        apply(&mut docs, DocumentKey::new(collection, id), fields, false);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DocumentKey, StoredDocument>> {
        // A poisoned map is still structurally valid; every mutation is a single insert.
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn apply(
    docs: &mut HashMap<DocumentKey, StoredDocument>,
    key: DocumentKey,
    fields: Fields,
    merge: bool,
) {
    match docs.get_mut(&key) {
        Some(doc) => {
            if merge {
                doc.fields.extend(fields);
            } else {
                doc.fields = fields;
            }
            doc.version += 1;
        }
        None => {
            let id = key.id.clone();
            docs.insert(
                key,
                StoredDocument {
                    id,
                    fields,
                    version: 1,
                },
            );
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> PortResult<StoredDocument> {
        let key = DocumentKey::new(collection, id);
        self.lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {key} not found")))
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> PortResult<()> {
        let mut docs = self.lock();
        apply(&mut docs, DocumentKey::new(collection, id), fields, merge);
        Ok(())
    }

    async fn update_document(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()> {
        let key = DocumentKey::new(collection, id);
        let mut docs = self.lock();
        if !docs.contains_key(&key) {
            return Err(PortError::NotFound(format!("Document {key} not found")));
        }
        apply(&mut docs, key, fields, true);
        Ok(())
    }

    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>) -> PortResult<()> {
        let mut docs = self.lock();
        for pre in &preconditions {
            let current = docs.get(&pre.key).map(|d| d.version);
            if current != pre.version {
                return Err(PortError::Conflict(format!(
                    "{} changed since it was read",
                    pre.key
                )));
            }
        }
        for write in writes {
            match write {
                Write::Set { key, fields } => apply(&mut docs, key, fields, false),
                Write::Merge { key, fields } => apply(&mut docs, key, fields, true),
            }
        }
        Ok(())
    }

    async fn query_collection(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> PortResult<Vec<StoredDocument>> {
        let mut found: Vec<StoredDocument> = self
            .lock()
            .iter()
            .filter(|(key, doc)| {
                key.collection == collection && filters.iter().all(|f| f.matches(&doc.fields))
            })
            .map(|(_, doc)| doc.clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}
