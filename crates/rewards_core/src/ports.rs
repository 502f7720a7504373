//! crates/rewards_core/src/ports.rs
//!
//! Defines the service contracts (traits) the ledger core depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete document database and authentication provider.

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;

use crate::domain::UserId;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Transaction conflict: {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Document Model
//=========================================================================================

/// The top-level fields of a stored document.
pub type Fields = Map<String, Value>;

/// Addresses one document: a collection path plus the document id inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    pub collection: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as read from the store, with the version used for optimistic commits.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
    /// Bumped by the store on every write to the document.
    pub version: u64,
}

/// A version check evaluated atomically with the writes of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub key: DocumentKey,
    /// `None` requires that the document does not exist.
    pub version: Option<u64>,
}

/// A single write inside a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace the whole document, creating it if needed.
    Set { key: DocumentKey, fields: Fields },
    /// Overwrite only the given top-level fields, creating the document if needed.
    Merge { key: DocumentKey, fields: Fields },
}

impl Write {
    pub fn key(&self) -> &DocumentKey {
        match self {
            Write::Set { key, .. } | Write::Merge { key, .. } => key,
        }
    }
}

/// Equality filter on a top-level field, used by collection queries.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fails with `PortError::NotFound` when the document does not exist.
    async fn get_document(&self, collection: &str, id: &str) -> PortResult<StoredDocument>;

    /// Writes a document. With `merge` only the given top-level fields are replaced.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> PortResult<()>;

    /// Merges fields into an existing document; `PortError::NotFound` if it is absent.
    async fn update_document(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()>;

    /// Applies all writes atomically if every precondition still holds.
    /// Fails with `PortError::Conflict` otherwise, leaving the store untouched.
    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>) -> PortResult<()>;

    async fn query_collection(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> PortResult<Vec<StoredDocument>>;
}

/// The stream type returned by `AuthProvider::auth_state_changes`.
pub type AuthStateStream = Pin<Box<dyn Stream<Item = Option<UserId>> + Send>>;

pub trait AuthProvider: Send + Sync {
    /// The signed-in user, if any. Operations without a user are skipped, not failed.
    fn current_user_id(&self) -> Option<UserId>;

    /// Emits the current state first, then every sign-in / sign-out.
    fn auth_state_changes(&self) -> AuthStateStream;
}
