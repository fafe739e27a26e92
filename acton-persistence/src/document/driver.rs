//! Native document-store driver interface
//!
//! The document repository never talks to a store directly. It compiles the
//! filter/options model into native queries (see [`super::query`]) and hands
//! them to a [`DocumentDriver`], which owns one collection.
//!
//! # Available Drivers
//!
//! - **In-memory** ([`crate::memory::MemoryCollection`]): process-local store
//!   with sessions, unique indexes and call counters, used by the test suite
//!
//! Drivers report errors against the native call they were running; the
//! repository re-tags them with the contract operation.

use async_trait::async_trait;

use crate::repository::{Document, RelationKind, RepositoryResult, TransactionHandle};

/// Native sort: `(field, 1 | -1)` pairs in precedence order
pub type SortSpec = Vec<(String, i32)>;

/// Relation loaded from another collection during a find
///
/// For each result document, documents of `from` whose `foreign_field`
/// equals the document's `local_field` are attached under the relation
/// name. Soft-deleted related documents (non-null `marker_field`) are never
/// attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Related collection
    pub from: String,
    /// Field of the result document holding the join value
    pub local_field: String,
    /// Field of the related document compared to `local_field`
    pub foreign_field: String,
    /// Single document or list
    pub kind: RelationKind,
    /// Soft-delete marker of the related collection
    pub marker_field: String,
}

impl Lookup {
    /// A to-one relation: `local_field` holds the related `_id`
    pub fn one(from: impl Into<String>, local_field: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: "_id".to_string(),
            kind: RelationKind::One,
            marker_field: "deleted_at".to_string(),
        }
    }

    /// A to-many relation: related documents hold this document's `_id`
    /// in `foreign_field`
    pub fn many(from: impl Into<String>, foreign_field: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            local_field: "_id".to_string(),
            foreign_field: foreign_field.into(),
            kind: RelationKind::Many,
            marker_field: "deleted_at".to_string(),
        }
    }

    /// Override the related collection's soft-delete marker
    #[must_use]
    pub fn marker_field(mut self, field: impl Into<String>) -> Self {
        self.marker_field = field.into();
        self
    }
}

/// Native find options
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    /// `{field: 1, ...}` inclusion projection
    pub projection: Option<Document>,
    /// Sort applied before the window
    pub sort: SortSpec,
    /// Number of documents to skip
    pub skip: Option<u64>,
    /// Maximum number of documents to return
    pub limit: Option<u64>,
    /// Relations attached to each result, keyed by relation name
    pub lookups: Vec<(String, Lookup)>,
}

impl FindSpec {
    /// Same spec restricted to the first match
    #[must_use]
    pub fn first(mut self) -> Self {
        self.limit = Some(1);
        self
    }
}

/// One collection of a document store
///
/// Every method takes the caller's session, if any; a driver fails with
/// `InvalidArgument` when handed a session issued by another backend.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    /// Native collection handle exposed through `Repository::model`
    type Collection: ?Sized + Send + Sync;

    /// The native handle
    fn collection(&self) -> &Self::Collection;

    /// Backend name used in log fields
    fn backend(&self) -> &'static str;

    /// Documents matching `filter`, with sort, window, projection and lookups applied
    async fn find(
        &self,
        filter: &Document,
        spec: &FindSpec,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>>;

    /// Number of documents matching `filter`
    async fn count(
        &self,
        filter: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Insert one document, returning it as stored
    async fn insert_one(
        &self,
        document: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Document>;

    /// Insert a batch atomically: either every document is stored or none
    async fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Replace the first document matching `filter`, returning the new version
    async fn replace_one(
        &self,
        filter: &Document,
        replacement: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>>;

    /// Apply a `$set` / `$unset` update to the first match, returning the new version
    async fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>>;

    /// Remove the first match, returning it
    async fn find_one_and_delete(
        &self,
        filter: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>>;

    /// Apply a `$set` / `$unset` update to every match, returning the match count
    async fn update_many(
        &self,
        filter: &Document,
        update: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Remove every match, returning the removed count
    async fn delete_many(
        &self,
        filter: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Run an aggregation pipeline
    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>>;
}
