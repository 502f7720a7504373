//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DocumentStore` port from the `core` crate. Every collection lives in a
//! single `documents` table keyed by `(collection, id)`, with the fields stored as
//! JSONB and a version column that backs the optimistic transactions.

use async_trait::async_trait;
use rewards_core::ports::{
    DocumentKey, DocumentStore, Fields, Filter, PortError, PortResult, Precondition,
    StoredDocument, Write,
};
use serde_json::Value;
use sqlx::postgres::PgExecutor;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::HashSet;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct DocumentRecord {
    id: String,
    fields: Json<Fields>,
    version: i64,
}
impl DocumentRecord {
    fn to_domain(self) -> StoredDocument {
        StoredDocument {
            id: self.id,
            fields: self.fields.0,
            version: u64::try_from(self.version).unwrap_or(0),
        }
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Translates a driver error into the port's failure taxonomy.
fn port_error(err: sqlx::Error, what: &str) -> PortError {
    match err {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{what} not found")),
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => PortError::Unavailable(err.to_string()),
        sqlx::Error::Database(ref db_err) => match db_err.code().as_deref() {
            // serialization_failure, deadlock_detected, unique_violation
            Some("40001") | Some("40P01") | Some("23505") => {
                PortError::Conflict(format!("{what}: {err}"))
            }
            Some("42501") => PortError::PermissionDenied(err.to_string()),
            _ => PortError::Unexpected(err.to_string()),
        },
        other => PortError::Unexpected(other.to_string()),
    }
}

/// Builds the JSONB containment object for equality filters.
fn containment(filters: &[Filter]) -> Value {
    Value::Object(
        filters
            .iter()
            .map(|f| (f.field.clone(), f.value.clone()))
            .collect(),
    )
}

//=========================================================================================
// Write Helpers
//=========================================================================================

const UPSERT_MERGE: &str = "INSERT INTO documents (collection, id, fields) VALUES ($1, $2, $3) \
     ON CONFLICT (collection, id) DO UPDATE \
     SET fields = documents.fields || EXCLUDED.fields, version = documents.version + 1, updated_at = now()";

const UPSERT_REPLACE: &str = "INSERT INTO documents (collection, id, fields) VALUES ($1, $2, $3) \
     ON CONFLICT (collection, id) DO UPDATE \
     SET fields = EXCLUDED.fields, version = documents.version + 1, updated_at = now()";

async fn upsert<'e, E>(executor: E, key: &DocumentKey, fields: Fields, merge: bool) -> PortResult<()>
where
    E: PgExecutor<'e>,
{
    let sql = if merge { UPSERT_MERGE } else { UPSERT_REPLACE };
    sqlx::query(sql)
        .bind(&key.collection)
        .bind(&key.id)
        .bind(Json(fields))
        .execute(executor)
        .await
        .map_err(|e| port_error(e, &key.to_string()))?;
    Ok(())
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> PortResult<StoredDocument> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, fields, version FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| port_error(e, &format!("Document {collection}/{id}")))?;
        Ok(record.to_domain())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        merge: bool,
    ) -> PortResult<()> {
        upsert(&self.pool, &DocumentKey::new(collection, id), fields, merge).await
    }

    async fn update_document(&self, collection: &str, id: &str, fields: Fields) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE documents SET fields = fields || $3, version = version + 1, updated_at = now() \
             WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(fields))
        .execute(&self.pool)
        .await
        .map_err(|e| port_error(e, &format!("Document {collection}/{id}")))?;

        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Document {collection}/{id} not found"
            )));
        }
        Ok(())
    }

    async fn commit(
        &self,
        mut preconditions: Vec<Precondition>,
        writes: Vec<Write>,
    ) -> PortResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| port_error(e, "transaction"))?;

        // Lock rows in key order so concurrent commits cannot deadlock each other.
        preconditions.sort_by(|a, b| a.key.cmp(&b.key));
        let mut absent = HashSet::new();
        for pre in &preconditions {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
            )
            .bind(&pre.key.collection)
            .bind(&pre.key.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| port_error(e, &pre.key.to_string()))?;

            let current = current.map(|v| u64::try_from(v).unwrap_or(0));
            if current != pre.version {
                debug!(key = %pre.key, expected = ?pre.version, found = ?current, "Stale read, rolling back");
                return Err(PortError::Conflict(format!(
                    "{} changed since it was read",
                    pre.key
                )));
            }
            if current.is_none() {
                absent.insert(pre.key.clone());
            }
        }

        for write in writes {
            let (key, fields, merge) = match write {
                Write::Set { key, fields } => (key, fields, false),
                Write::Merge { key, fields } => (key, fields, true),
            };
            // A document read as missing must still be missing; a concurrent
            // creator surfaces here as a unique violation.
            if absent.remove(&key) {
                sqlx::query("INSERT INTO documents (collection, id, fields) VALUES ($1, $2, $3)")
                    .bind(&key.collection)
                    .bind(&key.id)
                    .bind(Json(fields))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| port_error(e, &key.to_string()))?;
            } else {
                upsert(&mut *tx, &key, fields, merge).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| port_error(e, "transaction"))?;
        Ok(())
    }

    async fn query_collection(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> PortResult<Vec<StoredDocument>> {
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, fields, version FROM documents \
             WHERE collection = $1 AND fields @> $2 ORDER BY id",
        )
        .bind(collection)
        .bind(Json(containment(filters)))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| port_error(e, collection))?;

        // Containment also matches array supersets, so re-check exact equality.
        Ok(records
            .into_iter()
            .map(DocumentRecord::to_domain)
            .filter(|doc| filters.iter().all(|f| f.matches(&doc.fields)))
            .collect())
    }
}
