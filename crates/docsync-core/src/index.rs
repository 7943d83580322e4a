use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageError;
use crate::record::StudentRecord;

/// Sort values of the last hit of a page, used as the next `search_after`.
pub type SortCursor = Vec<Value>;

/// One page of the incremental range query.
///
/// Results are filtered to `modified > modified_after` and sorted by
/// `(modified asc, id asc)`; the id tiebreak makes the cursor stable when
/// many documents share a modification time.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePageQuery {
    pub modified_after: DateTime<Utc>,
    pub page_size: usize,
    pub search_after: Option<SortCursor>,
}

/// A raw search hit. `source` is the projected document, if the index
/// returned one.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: String,
    pub source: Option<Value>,
    pub sort: SortCursor,
}

/// Document index abstraction (Elasticsearch or in-memory).
///
/// An implementation is bound to a single index.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Name of the index this handle targets.
    fn index_name(&self) -> &str;

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Option<StudentRecord>, StorageError>;

    /// Create a document. Fails if the id already exists.
    async fn create(&self, record: &StudentRecord) -> Result<String, StorageError>;

    /// Insert or replace a document by id.
    async fn upsert(&self, record: &StudentRecord) -> Result<String, StorageError>;

    /// Merge fields into an existing document.
    async fn update(&self, record: &StudentRecord) -> Result<String, StorageError>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// List up to `limit` documents.
    async fn list(&self, limit: usize) -> Result<Vec<StudentRecord>, StorageError>;

    // =========================================================================
    // Incremental Query
    // =========================================================================

    /// Run one page of the sorted range query.
    async fn search_modified_after(
        &self,
        query: &RangePageQuery,
    ) -> Result<Vec<IndexHit>, StorageError>;
}
