//! Relational repository
//!
//! [`RelationalRepository`] implements the [`Repository`] contract over any
//! [`RelationalDriver`]. Writes follow the load, merge, save pattern: the
//! target row is loaded in full, the payload is merged into it with
//! [`merge_fields`], and the whole row is saved back. Concurrent writers to
//! the same row therefore race with last-write-wins semantics.

use std::marker::PhantomData;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use super::driver::RelationalDriver;
use super::query::{RawSql, Relation, SelectQuery};
use crate::repository::{
    from_document, from_documents, marker_value, merge_fields, strip_fields, to_document,
    BulkOptions, CountOptions, CreateOptions, Document, Entity, Filter, FilterCondition,
    FilterValue, RawOptions, ReadOptions, RelationRegistry, Repository, RepositoryError,
    RepositoryOperation, RepositoryResult, TransactionHandle, WriteOptions,
};

/// Repository over one relational table
pub struct RelationalRepository<E, D> {
    driver: D,
    relations: RelationRegistry<Relation>,
    _entity: PhantomData<fn() -> E>,
}

impl<E, D> RelationalRepository<E, D>
where
    E: Entity,
    D: RelationalDriver,
{
    /// Create a repository over a table driver
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            relations: RelationRegistry::new(),
            _entity: PhantomData,
        }
    }

    /// Register the relations available to `join`
    #[must_use]
    pub fn with_relations(mut self, relations: RelationRegistry<Relation>) -> Self {
        self.relations = relations;
        self
    }

    /// The underlying driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn primary_key(&self) -> &str {
        &self.driver.schema().primary_key
    }

    fn deleted_column(&self) -> &str {
        &self.driver.schema().deleted_column
    }

    fn tag(operation: RepositoryOperation) -> impl Fn(RepositoryError) -> RepositoryError {
        move |e| e.with_operation(operation).with_entity_type(E::NAME)
    }

    fn not_found(operation: RepositoryOperation, target: &str) -> RepositoryError {
        RepositoryError::not_found(operation, E::NAME, target)
    }

    /// Structured conditions of a filter; native sub-documents are rejected
    fn select(&self, filter: &Filter, operation: RepositoryOperation) -> RepositoryResult<SelectQuery> {
        if filter.raw.is_some() {
            return Err(RepositoryError::invalid_argument(
                operation,
                "relational repositories do not accept raw filter documents",
            )
            .with_entity_type(E::NAME));
        }
        Ok(SelectQuery::new(filter.conditions.clone()))
    }

    fn id_filter(&self, id: &str) -> Filter {
        Filter::eq(self.primary_key(), id)
    }

    fn ids_filter(&self, ids: &[String]) -> Filter {
        Filter::from(FilterCondition::is_in(self.primary_key(), ids.to_vec()))
    }

    /// Query addressing exactly one loaded row, whatever its marker
    fn row_query(&self, row: &Document, operation: RepositoryOperation) -> RepositoryResult<SelectQuery> {
        let key = row
            .get(self.primary_key())
            .and_then(FilterValue::from_json)
            .filter(|v| *v != FilterValue::Null)
            .ok_or_else(|| {
                RepositoryError::serialization_error(
                    operation,
                    format!("stored row has no usable '{}' value", self.primary_key()),
                )
            })?;
        Ok(SelectQuery::new(vec![FilterCondition::eq(self.primary_key(), key)]).with_deleted(true))
    }

    fn read_query(
        &self,
        filter: &Filter,
        options: &ReadOptions<'_>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<SelectQuery> {
        let mut query = self.select(filter, operation)?.with_deleted(options.with_deleted);
        query.relations = self
            .relations
            .resolve(&options.join, operation)
            .map_err(|e| e.with_entity_type(E::NAME))?;
        query.order = options.sort.fields().to_vec();
        query.skip = options.paging.map(|p| p.offset);
        query.take = options.paging.map(|p| p.limit);
        let selected = options
            .select
            .as_ref()
            .map(|p| p.selected())
            .unwrap_or_default();
        if !selected.is_empty() {
            query.select = selected.into_iter().map(String::from).collect();
            if !query.select.iter().any(|c| c == self.primary_key()) {
                query.select.push(self.primary_key().to_string());
            }
        }
        Ok(query)
    }

    /// Serialise a payload for insertion: key set or generated, marker cleared
    fn prepare_insert<P>(
        &self,
        data: &P,
        explicit_id: Option<&str>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<Document>
    where
        P: Serialize + ?Sized,
    {
        let mut row = to_document(data, operation)?;
        let key = self.primary_key().to_string();
        match explicit_id {
            Some(id) => {
                row.insert(key, Value::String(id.to_string()));
            }
            None => {
                if matches!(row.get(&key), None | Some(Value::Null)) {
                    row.insert(key, Value::String(uuid::Uuid::new_v4().to_string()));
                }
            }
        }
        row.insert(self.deleted_column().to_string(), Value::Null);
        Ok(row)
    }

    async fn load_first(
        &self,
        query: SelectQuery,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<Document> {
        self.driver
            .find(&query.first(), session)
            .await
            .map_err(Self::tag(operation))?
            .into_iter()
            .next()
            .ok_or_else(|| Self::not_found(operation, target))
    }

    async fn read_one(
        &self,
        filter: &Filter,
        options: ReadOptions<'_>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E> {
        let query = self.read_query(filter, &options, operation)?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            target,
            "Reading one row"
        );

        let row = self.load_first(query, options.session, operation, target).await?;
        from_document(row, operation)
    }

    async fn update_matching<P>(
        &self,
        filter: &Filter,
        data: &P,
        options: WriteOptions<'_>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E>
    where
        P: Serialize + Sync + ?Sized,
    {
        let protected = [self.primary_key(), self.deleted_column()];
        let patch = strip_fields(to_document(data, operation)?, &protected);
        let query = self
            .select(filter, operation)?
            .with_deleted(options.with_deleted);

        let mut row = self.load_first(query, options.session, operation, target).await?;
        merge_fields(&mut row, &patch, &protected);

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            target,
            fields = patch.len(),
            "Saving merged row"
        );

        let saved = self
            .driver
            .save(row, options.session)
            .await
            .map_err(Self::tag(operation))?
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(saved, operation)
    }

    async fn delete_matching(
        &self,
        filter: &Filter,
        options: WriteOptions<'_>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E> {
        let query = self
            .select(filter, operation)?
            .with_deleted(options.with_deleted);
        let row = self.load_first(query, options.session, operation, target).await?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            target,
            "Deleting row"
        );

        let removed = self
            .driver
            .delete(&self.row_query(&row, operation)?, options.session)
            .await
            .map_err(Self::tag(operation))?
            .into_iter()
            .next()
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(removed, operation)
    }

    /// Query for the rows a marker change targets
    fn marker_query(
        &self,
        filter: &Filter,
        restore: bool,
        operation: RepositoryOperation,
    ) -> RepositoryResult<SelectQuery> {
        let query = self.select(filter, operation)?;
        Ok(if restore {
            query
                .with_deleted(true)
                .and(FilterCondition::is_not_null(self.deleted_column()))
        } else {
            query.with_deleted(false)
        })
    }

    fn marker(restore: bool) -> Value {
        if restore {
            Value::Null
        } else {
            marker_value(Utc::now())
        }
    }

    async fn mark_one(
        &self,
        filter: &Filter,
        restore: bool,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
        target: &str,
    ) -> RepositoryResult<E> {
        let query = self.marker_query(filter, restore, operation)?;
        let mut row = self.load_first(query, session, operation, target).await?;
        row.insert(self.deleted_column().to_string(), Self::marker(restore));

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            target,
            "Changing delete marker"
        );

        let saved = self
            .driver
            .save(row, session)
            .await
            .map_err(Self::tag(operation))?
            .ok_or_else(|| Self::not_found(operation, target))?;
        from_document(saved, operation)
    }

    async fn mark_many(
        &self,
        filter: &Filter,
        restore: bool,
        session: Option<&dyn TransactionHandle>,
        operation: RepositoryOperation,
    ) -> RepositoryResult<bool> {
        let query = self.marker_query(filter, restore, operation)?;
        let mut rows = self
            .driver
            .find(&query, session)
            .await
            .map_err(Self::tag(operation))?;
        if rows.is_empty() {
            return Ok(true);
        }

        let marker = Self::marker(restore);
        for row in &mut rows {
            row.insert(self.deleted_column().to_string(), marker.clone());
        }
        let saved = self
            .driver
            .save_many(rows, session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            saved,
            "Changed delete markers"
        );
        Ok(true)
    }
}

impl<E, D> Repository<E> for RelationalRepository<E, D>
where
    E: Entity,
    D: RelationalDriver,
{
    type Model = D::Handle;
    type RawQuery = RawSql;
    type RawRow = Document;

    async fn find_all(&self, filter: &Filter, options: ReadOptions<'_>) -> RepositoryResult<Vec<E>> {
        let operation = RepositoryOperation::FindAll;
        let query = self.read_query(filter, &options, operation)?;
        let rows = self
            .driver
            .find(&query, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            count = rows.len(),
            "Found rows"
        );
        from_documents(rows, operation)
    }

    async fn find_one(&self, filter: &Filter, options: ReadOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.read_one(filter, options, RepositoryOperation::FindOne, &target)
            .await
    }

    async fn find_one_by_id(&self, id: &str, options: ReadOptions<'_>) -> RepositoryResult<E> {
        self.read_one(&self.id_filter(id), options, RepositoryOperation::FindOneById, id)
            .await
    }

    async fn get_total(&self, filter: &Filter, options: CountOptions<'_>) -> RepositoryResult<u64> {
        let operation = RepositoryOperation::Count;
        let query = self
            .select(filter, operation)?
            .with_deleted(options.with_deleted);
        self.driver
            .count(&query, options.session)
            .await
            .map_err(Self::tag(operation))
    }

    async fn exists(&self, filter: &Filter, options: CountOptions<'_>) -> RepositoryResult<bool> {
        let operation = RepositoryOperation::Exists;
        let mut query = self
            .select(filter, operation)?
            .with_deleted(options.with_deleted);
        if !options.exclude_ids.is_empty() {
            query = query.and(FilterCondition::not_in(
                self.primary_key(),
                options.exclude_ids.clone(),
            ));
        }
        query.select = vec![self.primary_key().to_string()];

        let found = self
            .driver
            .find(&query.first(), options.session)
            .await
            .map_err(Self::tag(operation))?;
        Ok(!found.is_empty())
    }

    async fn create<P>(&self, data: &P, options: CreateOptions<'_>) -> RepositoryResult<E>
    where
        P: Serialize + Sync,
    {
        let operation = RepositoryOperation::Create;
        let row = self.prepare_insert(data, options.id.as_deref(), operation)?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            "Inserting row"
        );

        let stored = self
            .driver
            .insert(vec![row], options.session)
            .await
            .map_err(Self::tag(operation))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RepositoryError::database_error(operation, "insert returned no row")
                    .with_entity_type(E::NAME)
            })?;
        from_document(stored, operation)
    }

    async fn update_one_by_id<P>(
        &self,
        id: &str,
        data: &P,
        options: WriteOptions<'_>,
    ) -> RepositoryResult<E>
    where
        P: Serialize + Sync,
    {
        self.update_matching(&self.id_filter(id), data, options, RepositoryOperation::Update, id)
            .await
    }

    async fn update_one<P>(
        &self,
        filter: &Filter,
        data: &P,
        options: WriteOptions<'_>,
    ) -> RepositoryResult<E>
    where
        P: Serialize + Sync,
    {
        let target = filter.to_string();
        self.update_matching(filter, data, options, RepositoryOperation::Update, &target)
            .await
    }

    async fn delete_one_by_id(&self, id: &str, options: WriteOptions<'_>) -> RepositoryResult<E> {
        self.delete_matching(&self.id_filter(id), options, RepositoryOperation::Delete, id)
            .await
    }

    async fn delete_one(&self, filter: &Filter, options: WriteOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.delete_matching(filter, options, RepositoryOperation::Delete, &target)
            .await
    }

    async fn soft_delete_one_by_id(
        &self,
        id: &str,
        options: WriteOptions<'_>,
    ) -> RepositoryResult<E> {
        self.mark_one(
            &self.id_filter(id),
            false,
            options.session,
            RepositoryOperation::SoftDelete,
            id,
        )
        .await
    }

    async fn soft_delete_one(&self, filter: &Filter, options: WriteOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.mark_one(
            filter,
            false,
            options.session,
            RepositoryOperation::SoftDelete,
            &target,
        )
        .await
    }

    async fn restore_one_by_id(&self, id: &str, options: WriteOptions<'_>) -> RepositoryResult<E> {
        self.mark_one(
            &self.id_filter(id),
            true,
            options.session,
            RepositoryOperation::Restore,
            id,
        )
        .await
    }

    async fn restore_one(&self, filter: &Filter, options: WriteOptions<'_>) -> RepositoryResult<E> {
        let target = filter.to_string();
        self.mark_one(filter, true, options.session, RepositoryOperation::Restore, &target)
            .await
    }

    async fn create_many<P>(&self, data: &[P], options: BulkOptions<'_>) -> RepositoryResult<bool>
    where
        P: Serialize + Sync,
    {
        let operation = RepositoryOperation::CreateMany;
        let rows = data
            .iter()
            .map(|item| self.prepare_insert(item, None, operation))
            .collect::<RepositoryResult<Vec<_>>>()?;
        if rows.is_empty() {
            return Ok(true);
        }

        let inserted = self
            .driver
            .insert(rows, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            inserted = inserted.len(),
            "Inserted rows"
        );
        Ok(true)
    }

    async fn delete_many_by_ids(&self, ids: &[String], options: BulkOptions<'_>) -> RepositoryResult<bool> {
        self.delete_many(&self.ids_filter(ids), options).await
    }

    async fn delete_many(&self, filter: &Filter, options: BulkOptions<'_>) -> RepositoryResult<bool> {
        let operation = RepositoryOperation::DeleteMany;
        let query = self
            .select(filter, operation)?
            .with_deleted(options.with_deleted);
        let removed = self
            .driver
            .delete(&query, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            removed = removed.len(),
            "Deleted rows"
        );
        Ok(true)
    }

    async fn soft_delete_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> RepositoryResult<bool> {
        self.mark_many(
            &self.ids_filter(ids),
            false,
            options.session,
            RepositoryOperation::SoftDeleteMany,
        )
        .await
    }

    async fn soft_delete_many(&self, filter: &Filter, options: BulkOptions<'_>) -> RepositoryResult<bool> {
        self.mark_many(filter, false, options.session, RepositoryOperation::SoftDeleteMany)
            .await
    }

    async fn restore_many_by_ids(
        &self,
        ids: &[String],
        options: BulkOptions<'_>,
    ) -> RepositoryResult<bool> {
        self.mark_many(
            &self.ids_filter(ids),
            true,
            options.session,
            RepositoryOperation::RestoreMany,
        )
        .await
    }

    async fn restore_many(&self, filter: &Filter, options: BulkOptions<'_>) -> RepositoryResult<bool> {
        self.mark_many(filter, true, options.session, RepositoryOperation::RestoreMany)
            .await
    }

    async fn update_many<P>(
        &self,
        filter: &Filter,
        data: &P,
        options: BulkOptions<'_>,
    ) -> RepositoryResult<bool>
    where
        P: Serialize + Sync,
    {
        let operation = RepositoryOperation::UpdateMany;
        let protected = [self.primary_key(), self.deleted_column()];
        let changes = strip_fields(to_document(data, operation)?, &protected);
        let query = self
            .select(filter, operation)?
            .with_deleted(options.with_deleted);
        if changes.is_empty() {
            return Ok(true);
        }

        let matched = self
            .driver
            .update_where(&query, &changes, options.session)
            .await
            .map_err(Self::tag(operation))?;

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            table = %self.driver.schema().table,
            operation = %operation,
            matched,
            "Updated rows"
        );
        Ok(true)
    }

    /// Execute caller-written SQL
    ///
    /// The statement is run as given: soft-delete visibility is the
    /// statement's own business, so `options.with_deleted` has no effect.
    async fn raw(&self, query: RawSql, options: RawOptions<'_>) -> RepositoryResult<Vec<Document>> {
        let operation = RepositoryOperation::Raw;
        if query.sql.trim().is_empty() {
            return Err(
                RepositoryError::invalid_argument(operation, "raw SQL statement is empty")
                    .with_entity_type(E::NAME),
            );
        }

        tracing::debug!(
            entity = E::NAME,
            backend = self.driver.backend(),
            operation = %operation,
            params = query.params.len(),
            "Running raw statement"
        );

        self.driver
            .raw(&query, options.session)
            .await
            .map_err(Self::tag(operation))
    }

    fn model(&self) -> &D::Handle {
        self.driver.handle()
    }
}
