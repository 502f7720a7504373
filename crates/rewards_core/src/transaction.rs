//! crates/rewards_core/src/transaction.rs
//!
//! Optimistic read-check-write transactions over the `DocumentStore` port.
//!
//! A transaction declares the documents it reads up front. The runner reads them,
//! hands the snapshot to a pure body, and commits the body's writes together with
//! a version precondition for every document read. If another writer got there
//! first the commit fails with a conflict and the whole sequence is re-run.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::ports::{DocumentKey, DocumentStore, Fields, PortError, Precondition, StoredDocument, Write};

/// The documents read at the start of one transaction attempt.
#[derive(Debug, Default)]
pub struct Snapshot {
    docs: HashMap<DocumentKey, Option<StoredDocument>>,
}

impl Snapshot {
    pub fn get(&self, key: &DocumentKey) -> Option<&StoredDocument> {
        self.docs.get(key).and_then(Option::as_ref)
    }

    /// Decodes a document into a typed view; `None` if it does not exist.
    pub fn decode<T: DeserializeOwned>(&self, key: &DocumentKey) -> LedgerResult<Option<T>> {
        self.get(key)
            .map(|doc| decode_fields(key, &doc.fields))
            .transpose()
    }

    fn preconditions(&self) -> Vec<Precondition> {
        self.docs
            .iter()
            .map(|(key, doc)| Precondition {
                key: key.clone(),
                version: doc.as_ref().map(|d| d.version),
            })
            .collect()
    }
}

/// What a transaction body decided: the writes to commit and the value to return.
#[derive(Debug)]
pub struct TxnPlan<T> {
    writes: Vec<Write>,
    output: T,
}

impl<T> TxnPlan<T> {
    /// A plan that commits nothing.
    pub fn read_only(output: T) -> Self {
        Self {
            writes: Vec::new(),
            output,
        }
    }

    pub fn with_writes(writes: Vec<Write>, output: T) -> Self {
        Self { writes, output }
    }
}

/// Runs `body` against a fresh snapshot of `keys` until its writes commit.
///
/// A body error aborts without committing. Conflicts are retried up to
/// `max_attempts` times before surfacing `LedgerError::Conflict`.
pub async fn run_transaction<T, F>(
    store: &dyn DocumentStore,
    keys: &[DocumentKey],
    max_attempts: u32,
    mut body: F,
) -> LedgerResult<T>
where
    F: FnMut(&Snapshot) -> LedgerResult<TxnPlan<T>> + Send,
    T: Send,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let snapshot = read_snapshot(store, keys).await?;
        let plan = body(&snapshot)?;
        if plan.writes.is_empty() {
            return Ok(plan.output);
        }

        match store.commit(snapshot.preconditions(), plan.writes).await {
            Ok(()) => return Ok(plan.output),
            Err(PortError::Conflict(reason)) => {
                debug!(attempt, %reason, "Transaction conflict, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    warn!(attempts, "Transaction still conflicting after the last attempt");
    Err(LedgerError::Conflict)
}

async fn read_snapshot(store: &dyn DocumentStore, keys: &[DocumentKey]) -> LedgerResult<Snapshot> {
    let mut docs = HashMap::with_capacity(keys.len());
    for key in keys {
        let doc = match store.get_document(&key.collection, &key.id).await {
            Ok(doc) => Some(doc),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        docs.insert(key.clone(), doc);
    }
    Ok(Snapshot { docs })
}

/// Decodes stored fields into a typed document view.
pub fn decode_fields<T: DeserializeOwned>(key: &DocumentKey, fields: &Fields) -> LedgerResult<T> {
    serde_json::from_value(Value::Object(fields.clone())).map_err(|e| LedgerError::Malformed {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Encodes a typed value as top-level document fields.
pub fn encode_fields<T: Serialize>(value: &T) -> LedgerResult<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(LedgerError::Unexpected(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(LedgerError::Unexpected(e.to_string())),
    }
}
