//! Native relational driver interface
//!
//! # Available Drivers
//!
//! - **In-memory** ([`crate::memory::MemoryTable`]): process-local tables
//! - **PostgreSQL** (`postgres` feature): `PgTableDriver` over sqlx

use async_trait::async_trait;

use super::query::{RawSql, SelectQuery, TableSchema};
use crate::repository::{Document, RepositoryResult, TransactionHandle};

/// One table of a relational store
///
/// Rows travel as JSON objects keyed by column name. A driver handed a
/// session issued by another backend fails with `InvalidArgument`.
#[async_trait]
pub trait RelationalDriver: Send + Sync {
    /// Native handle exposed through `Repository::model`
    type Handle: ?Sized + Send + Sync;

    /// The native handle
    fn handle(&self) -> &Self::Handle;

    /// Backend name used in log fields
    fn backend(&self) -> &'static str;

    /// Table layout
    fn schema(&self) -> &TableSchema;

    /// Rows matching the query, with relations attached
    async fn find(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>>;

    /// Number of rows matching the query (window ignored)
    async fn count(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Insert rows atomically, returning them as stored
    async fn insert(
        &self,
        rows: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>>;

    /// Write a full row back by primary key; `None` when the row is gone
    async fn save(
        &self,
        row: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>>;

    /// Write full rows back by primary key, returning how many were written
    async fn save_many(
        &self,
        rows: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Set columns on every matching row, returning the match count
    async fn update_where(
        &self,
        query: &SelectQuery,
        changes: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64>;

    /// Remove every matching row, returning the removed rows
    async fn delete(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>>;

    /// Execute a native statement, returning its rows
    async fn raw(
        &self,
        statement: &RawSql,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>>;
}
