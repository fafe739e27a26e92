//! In-memory document store

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::engine::{memory_session, CallCounter, Engine, MemorySession, Rows, BACKEND};
use super::matcher::{apply_update, lookup, matches, project, run_pipeline, sort_rows, window};
use crate::document::{DocumentDriver, FindSpec, Lookup, ID_FIELD};
use crate::repository::{
    is_active_document, Document, RelationKind, RepositoryOperation, RepositoryResult,
    TransactionHandle,
};

/// Process-local document store
///
/// Cloning the store shares its data.
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    engine: Arc<Engine>,
}

impl MemoryDocumentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            engine: Engine::new(),
        }
    }

    /// Handle on a named collection (created on first write)
    pub fn collection(&self, name: impl Into<String>) -> MemoryCollection {
        MemoryCollection {
            engine: self.engine.clone(),
            name: name.into(),
            calls: CallCounter::default(),
        }
    }

    /// Declare a unique index on a collection field
    pub fn create_unique_index(&self, collection: &str, field: &str) {
        self.engine.add_unique(collection, field);
    }

    /// Start a caller-owned session
    pub fn start_session(&self) -> MemorySession {
        MemorySession::new(self.engine.clone())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on one collection of a [`MemoryDocumentStore`]
///
/// Each handle counts the driver calls made through it.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    engine: Arc<Engine>,
    name: String,
    calls: CallCounter,
}

impl MemoryCollection {
    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of driver calls made through this handle
    pub fn call_count(&self) -> u64 {
        self.calls.get()
    }

    /// Every stored document, soft-deleted ones included
    pub async fn documents(&self) -> Vec<Document> {
        self.engine
            .read(&self.name, None, RepositoryOperation::FindAll)
            .await
            .unwrap_or_default()
    }

    fn filtered(
        rows: Rows,
        filter: &Document,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Rows> {
        let mut kept = Vec::new();
        for row in rows {
            if matches(&row, filter, operation)? {
                kept.push(row);
            }
        }
        Ok(kept)
    }

    fn position(
        rows: &Rows,
        filter: &Document,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Option<usize>> {
        for (index, row) in rows.iter().enumerate() {
            if matches(row, filter, operation)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

/// Attach related documents under their relation names
pub(crate) async fn attach_lookups(
    engine: &Arc<Engine>,
    rows: &[Document],
    lookups: &[(String, Lookup)],
    session: Option<&MemorySession>,
) -> RepositoryResult<Vec<Vec<(String, Value)>>> {
    let mut attached = vec![Vec::new(); rows.len()];
    for (name, relation) in lookups {
        let related = engine
            .read(&relation.from, session, RepositoryOperation::Join)
            .await?;
        let related: Vec<&Document> = related
            .iter()
            .filter(|doc| is_active_document(doc, &relation.marker_field))
            .collect();

        for (row, extra) in rows.iter().zip(attached.iter_mut()) {
            let key = lookup(row, &relation.local_field).cloned().unwrap_or(Value::Null);
            let mut hits = related
                .iter()
                .filter(|doc| !key.is_null() && lookup(doc, &relation.foreign_field) == Some(&key))
                .map(|doc| Value::Object((*doc).clone()));
            let value = match relation.kind {
                RelationKind::One => hits.next().unwrap_or(Value::Null),
                RelationKind::Many => Value::Array(hits.collect()),
            };
            extra.push((name.clone(), value));
        }
    }
    Ok(attached)
}

#[async_trait]
impl DocumentDriver for MemoryCollection {
    type Collection = MemoryCollection;

    fn collection(&self) -> &MemoryCollection {
        self
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn find(
        &self,
        filter: &Document,
        spec: &FindSpec,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::FindAll;
        let session = memory_session(session, operation)?;

        let rows = self.engine.read(&self.name, session, operation).await?;
        let mut rows = Self::filtered(rows, filter, operation)?;
        sort_rows(&mut rows, &spec.sort);
        let rows = window(rows, spec.skip, spec.limit);

        let attached = attach_lookups(&self.engine, &rows, &spec.lookups, session).await?;
        let mut output = Vec::with_capacity(rows.len());
        for (mut row, extra) in rows.into_iter().zip(attached) {
            row.extend(extra);
            let row = match &spec.projection {
                Some(projection) => project(row, projection, operation)?,
                None => row,
            };
            output.push(row);
        }
        Ok(output)
    }

    async fn count(
        &self,
        filter: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::Count;
        let session = memory_session(session, operation)?;
        let rows = self.engine.read(&self.name, session, operation).await?;
        Ok(Self::filtered(rows, filter, operation)?.len() as u64)
    }

    async fn insert_one(
        &self,
        document: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Document> {
        self.calls.hit();
        let operation = RepositoryOperation::Create;
        let session = memory_session(session, operation)?;
        let stored = document.clone();
        self.engine
            .write(&self.name, ID_FIELD, session, operation, move |rows| {
                rows.push(document);
                Ok(())
            })
            .await?;
        Ok(stored)
    }

    async fn insert_many(
        &self,
        documents: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::CreateMany;
        let session = memory_session(session, operation)?;
        let inserted = documents.len() as u64;
        self.engine
            .write(&self.name, ID_FIELD, session, operation, move |rows| {
                rows.extend(documents);
                Ok(())
            })
            .await?;
        Ok(inserted)
    }

    async fn replace_one(
        &self,
        filter: &Document,
        replacement: Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::Update;
        let session = memory_session(session, operation)?;
        self.engine
            .write(&self.name, ID_FIELD, session, operation, |rows| {
                match Self::position(rows, filter, operation)? {
                    Some(index) => {
                        rows[index] = replacement.clone();
                        Ok(Some(replacement))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    async fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::Update;
        let session = memory_session(session, operation)?;
        self.engine
            .write(&self.name, ID_FIELD, session, operation, |rows| {
                match Self::position(rows, filter, operation)? {
                    Some(index) => {
                        apply_update(&mut rows[index], update, operation)?;
                        Ok(Some(rows[index].clone()))
                    }
                    None => Ok(None),
                }
            })
            .await
    }

    async fn find_one_and_delete(
        &self,
        filter: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Option<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::Delete;
        let session = memory_session(session, operation)?;
        self.engine
            .write(&self.name, ID_FIELD, session, operation, |rows| {
                Ok(Self::position(rows, filter, operation)?.map(|index| rows.remove(index)))
            })
            .await
    }

    async fn update_many(
        &self,
        filter: &Document,
        update: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::UpdateMany;
        let session = memory_session(session, operation)?;
        self.engine
            .write(&self.name, ID_FIELD, session, operation, |rows| {
                let mut matched = 0;
                for row in rows.iter_mut() {
                    if matches(row, filter, operation)? {
                        apply_update(row, update, operation)?;
                        matched += 1;
                    }
                }
                Ok(matched)
            })
            .await
    }

    async fn delete_many(
        &self,
        filter: &Document,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<u64> {
        self.calls.hit();
        let operation = RepositoryOperation::DeleteMany;
        let session = memory_session(session, operation)?;
        self.engine
            .write(&self.name, ID_FIELD, session, operation, |rows| {
                let before = rows.len();
                let mut kept = Vec::with_capacity(before);
                for row in rows.drain(..) {
                    if !matches(&row, filter, operation)? {
                        kept.push(row);
                    }
                }
                *rows = kept;
                Ok((before - rows.len()) as u64)
            })
            .await
    }

    async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        session: Option<&dyn TransactionHandle>,
    ) -> RepositoryResult<Vec<Document>> {
        self.calls.hit();
        let operation = RepositoryOperation::Raw;
        let session = memory_session(session, operation)?;
        let rows = self.engine.read(&self.name, session, operation).await?;
        run_pipeline(rows, &pipeline, operation)
    }
}
