//! In-memory relational database
//!
//! Tables share the engine of the document store: conditions are compiled
//! with the document query builder and evaluated by the same matcher, and
//! relations are loaded with the same lookup routine.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::document::attach_lookups;
use super::engine::{memory_session, CallCounter, Engine, MemorySession, Rows, BACKEND};
use super::matcher::{matches, project, sort_rows, window};
use crate::document::{build_query, Lookup, SortSpec, StringIdScheme, Visibility};
use crate::relational::{RawSql, RelationalDriver, SelectQuery, TableSchema};
use crate::repository::{
    Document, Filter, RepositoryError, RepositoryErrorKind, RepositoryOperation,
    RepositoryResult, SortOrder, TransactionHandle,
};

/// Process-local relational database
///
/// Cloning the database shares its data.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    engine: Arc<Engine>,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    /// Handle on a table (created on first write)
    pub fn table(&self, schema: TableSchema) -> MemoryTable {
        MemoryTable {
            engine: self.engine.clone(),
            schema,
            calls: CallCounter::default(),
        }
    }

    /// Declare a unique constraint on a column
    pub fn create_unique_index(&self, table: &str, column: &str) {
        self.engine.add_unique(table, column);
    }

    /// Begin a caller-owned transaction
    pub fn begin(&self) -> MemorySession {
        MemorySession::new(self.engine.clone())
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on one table of a [`MemoryDatabase`]
#[derive(Debug, Clone)]
pub struct MemoryTable {
    engine: Arc<Engine>,
    schema: TableSchema,
    calls: CallCounter,
}

impl MemoryTable {
    /// Number of driver calls made through this handle
    pub fn call_count(&self) -> u64 {
        self.calls.get()
    }

    /// Every stored row, soft-deleted ones included
    pub async fn rows(&self) -> Vec<Document> {
        self.engine
            .read(&self.schema.table, None, RepositoryOperation::FindAll)
            .await
            .unwrap_or_default()
    }

    /// Native predicate of a query, visibility included
    fn predicate(&self, query: &SelectQuery, operation: RepositoryOperation) -> RepositoryResult<Document> {
        build_query::<StringIdScheme>(
            &Filter::from_conditions(query.conditions.clone()),
            &self.schema.deleted_column,
            Visibility::from_with_deleted(query.with_deleted),
            operation,
        )
    }

    fn filtered(rows: Rows, predicate: &Document, operation: RepositoryOperation) -> RepositoryResult<Rows> {
        let mut kept = Vec::new();
        for row in rows {
            if matches(&row, predicate, operation)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    fn key_of<'a>(&self, row: &'a Document) -> Option<&'a Value> {
        row.get(&self.schema.primary_key).filter(|v| !v.is_null())
    }

    fn position(&self, rows: &Rows, key: &Value) -> Option<usize> {
        rows.iter().position(|row| self.key_of(row) == Some(key))
    }

    fn missing_key(&self, operation: RepositoryOperation) -> RepositoryError {
        RepositoryError::invalid_argument(
            operation,
            format!("row has no '{}' value", self.schema.primary_key),
        )
    }
}

fn sort_spec(order: &[(String, SortOrder)]) -> SortSpec {
    order
        .iter()
        .map(|(column, direction)| {
            let direction = match direction {
                SortOrder::Asc => 1,
                SortOrder::Desc => -1,
            };
            (column.clone(), direction)
        })
        .collect()
}

#[async_trait]
impl RelationalDriver for MemoryTable {
    type Handle = MemoryTable;

    fn handle(&self) -> &MemoryTable {
        self
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn find(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::FindAll;
        let session = memory_session(session, operation)?;
        let predicate = self.predicate(query, operation)?;

        let rows = self.engine.read(&self.schema.table, session, operation).await?;
        let mut rows = Self::filtered(rows, &predicate, operation)?;
        sort_rows(&mut rows, &sort_spec(&query.order));
        let rows = window(rows, query.skip, query.take);

        let lookups: Vec<(String, Lookup)> = query
            .relations
            .iter()
            .map(|(name, relation)| {
                let lookup = Lookup {
                    from: relation.table.clone(),
                    local_field: relation.local_column.clone(),
                    foreign_field: relation.foreign_column.clone(),
                    kind: relation.kind,
                    marker_field: relation.deleted_column.clone(),
                };
                (name.clone(), lookup)
            })
            .collect();
        let attached = attach_lookups(&self.engine, &rows, &lookups, session).await?;

        let projection: Option<Document> = (!query.select.is_empty()).then(|| {
            query
                .select
                .iter()
                .map(|column| (column.clone(), Value::from(1)))
                .collect()
        });

        let mut output = Vec::with_capacity(rows.len());
        for (mut row, extra) in rows.into_iter().zip(attached) {
            row.extend(extra);
            let row = match &projection {
                Some(projection) => project(row, projection, operation)?,
                None => row,
            };
            output.push(row);
        }
        Ok(output)
    }

    async fn count(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::Count;
        let session = memory_session(session, operation)?;
        let predicate = self.predicate(query, operation)?;
        let rows = self.engine.read(&self.schema.table, session, operation).await?;
        Ok(Self::filtered(rows, &predicate, operation)?.len() as u64)
    }

    async fn insert(
        &self,
        rows: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::CreateMany;
        let session = memory_session(session, operation)?;
        if rows.iter().any(|row| self.key_of(row).is_none()) {
            return Err(self.missing_key(operation));
        }

        let stored = rows.clone();
        self.engine
            .write(&self.schema.table, &self.schema.primary_key, session, operation, move |table| {
                table.extend(rows);
                Ok(())
            })
            .await?;
        Ok(stored)
    }

    async fn save(
        &self,
        row: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::Update;
        let session = memory_session(session, operation)?;
        let key = self.key_of(&row).cloned().ok_or_else(|| self.missing_key(operation))?;

        self.engine
            .write(&self.schema.table, &self.schema.primary_key, session, operation, |table| {
                Ok(self.position(table, &key).map(|index| {
                    table[index] = row.clone();
                    row
                }))
            })
            .await
    }

    async fn save_many(
        &self,
        rows: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::UpdateMany;
        let session = memory_session(session, operation)?;

        self.engine
            .write(&self.schema.table, &self.schema.primary_key, session, operation, |table| {
                let mut saved = 0;
                for row in rows {
                    let key = self.key_of(&row).cloned().ok_or_else(|| self.missing_key(operation))?;
                    if let Some(index) = self.position(table, &key) {
                        table[index] = row;
                        saved += 1;
                    }
                }
                Ok(saved)
            })
            .await
    }

    async fn update_where(
        &self,
        query: &SelectQuery,
        changes: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::UpdateMany;
        let session = memory_session(session, operation)?;
        let predicate = self.predicate(query, operation)?;

        self.engine
            .write(&self.schema.table, &self.schema.primary_key, session, operation, |table| {
                let mut matched = 0;
                for row in table.iter_mut() {
                    if matches(row, &predicate, operation)? {
                        row.extend(changes.clone());
                        matched += 1;
                    }
                }
                Ok(matched)
            })
            .await
    }

    async fn delete(
        &self,
        query: &SelectQuery,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::DeleteMany;
        let session = memory_session(session, operation)?;
        let predicate = self.predicate(query, operation)?;

        self.engine
            .write(&self.schema.table, &self.schema.primary_key, session, operation, |table| {
                let mut kept = Vec::with_capacity(table.len());
                let mut removed = Vec::new();
                for row in table.drain(..) {
                    if matches(&row, &predicate, operation)? {
                        removed.push(row);
                    } else {
                        kept.push(row);
                    }
                }
                *table = kept;
                Ok(removed)
            })
            .await
    }

    async fn raw(
        &self,
        _statement: &RawSql,
        _session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        self.calls.hit();
        Err(RepositoryError::new(
            RepositoryOperation::Raw,
            RepositoryErrorKind::Other,
            "memory tables do not execute SQL",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::Relation;
    use crate::repository::FilterCondition;
    use serde_json::json;

    fn row(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn seeded() -> (MemoryDatabase, MemoryTable) {
        let db = MemoryDatabase::new();
        let table = db.table(TableSchema::new("users"));
        (db, table)
    }

    #[tokio::test]
    async fn test_find_hides_deleted_rows_unless_asked() {
        let (_db, users) = seeded();
        users
            .insert(
                vec![
                    row(json!({"id": "a", "deleted_at": null})),
                    row(json!({"id": "b", "deleted_at": "2024-01-01T00:00:00Z"})),
                ],
                None,
            )
            .await
            .unwrap();

        let active = users.find(&SelectQuery::default(), None).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["id"], json!("a"));

        let all = users
            .count(&SelectQuery::default().with_deleted(true), None)
            .await
            .unwrap();
        assert_eq!(all, 2);
    }

    #[tokio::test]
    async fn test_insert_requires_key() {
        let (_db, users) = seeded();
        let err = users.insert(vec![row(json!({"name": "x"}))], None).await.unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::InvalidArgument);
        assert!(users.rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_missing_row_returns_none() {
        let (_db, users) = seeded();
        let saved = users.save(row(json!({"id": "ghost"})), None).await.unwrap();
        assert!(saved.is_none());
        assert!(users.rows().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_where_merges_columns() {
        let (_db, users) = seeded();
        users
            .insert(
                vec![
                    row(json!({"id": "a", "role": "user", "n": 1})),
                    row(json!({"id": "b", "role": "admin", "n": 2})),
                ],
                None,
            )
            .await
            .unwrap();

        let query = SelectQuery::new(vec![FilterCondition::eq("role", "user")]);
        let matched = users
            .update_where(&query, &row(json!({"n": 10})), None)
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let rows = users.rows().await;
        assert_eq!(rows[0], row(json!({"id": "a", "role": "user", "n": 10})));
        assert_eq!(rows[1]["n"], json!(2));
    }

    #[tokio::test]
    async fn test_belongs_to_relation() {
        let db = MemoryDatabase::new();
        let teams = db.table(TableSchema::new("teams"));
        let users = db.table(TableSchema::new("users"));
        teams
            .insert(vec![row(json!({"id": "t1", "label": "core"}))], None)
            .await
            .unwrap();
        users
            .insert(
                vec![
                    row(json!({"id": "u1", "team_id": "t1"})),
                    row(json!({"id": "u2", "team_id": null})),
                ],
                None,
            )
            .await
            .unwrap();

        let mut query = SelectQuery::default();
        query.order = vec![("id".to_string(), SortOrder::Asc)];
        query.relations = vec![("team".to_string(), Relation::belongs_to("teams", "team_id"))];
        let rows = users.find(&query, None).await.unwrap();
        assert_eq!(rows[0]["team"]["label"], json!("core"));
        assert_eq!(rows[1]["team"], Value::Null);

        query.select = vec!["id".to_string()];
        let rows = users.find(&query, None).await.unwrap();
        assert_eq!(rows[0], row(json!({"id": "u1"})));

        query.select = vec!["id".to_string(), "team".to_string()];
        let rows = users.find(&query, None).await.unwrap();
        assert_eq!(rows[0]["team"]["label"], json!("core"));
        assert!(rows[0].get("team_id").is_none());
    }

    #[tokio::test]
    async fn test_raw_is_unsupported() {
        let (_db, users) = seeded();
        let err = users
            .raw(&RawSql::new("SELECT 1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, RepositoryErrorKind::Other);
        assert_eq!(err.operation, RepositoryOperation::Raw);
    }
}
